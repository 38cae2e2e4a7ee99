//! Language-model capability used by the agent loop
//!
//! A [`ChatModel`] takes the system prompt, the thread's full turn history
//! and the tool catalog, and answers with text, tool-call requests, or both.
//!
//! Providers:
//! - [`AnthropicModel`]: Messages API with native `tool_use` blocks
//! - [`OllamaModel`]: `/api/chat` with native tool calls, falling back to
//!   tool calls written as JSON in the reply text

pub mod anthropic;
pub mod ollama;

use async_trait::async_trait;
use serde_json::Value;

use crate::memory::Turn;
use crate::tools::ToolSpec;

pub use anthropic::{AnthropicConfig, AnthropicModel};
pub use ollama::{OllamaConfig, OllamaModel};

/// System prompt for the conversational agent
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant with access to tools.

Tools:
- weather: current conditions for a city. Include the state or country for accuracy.
- run_javascript_code_tool: runs JavaScript as the body of an async function in an isolated node process. Use it to calculate, verify results, or transform data. Log with console.log or return a value to see output.

Guidelines:
- Use a tool whenever it gives a more accurate answer than guessing
- If code fails, read the error message and fix it
- When you have what you need, answer the user directly in plain text"#;

/// One tool invocation requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// Provider-assigned id, echoed back with the result
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A model's answer for one round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    /// Free text; the final answer when there are no tool calls
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Whether retrying the same request may succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failures, rate limiting, overloaded or failing upstream
    Transient,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct ModelError {
    pub kind: ErrorKind,
    pub provider: &'static str,
    pub message: String,
}

impl ModelError {
    pub fn transient(provider: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            provider,
            message: message.into(),
        }
    }

    pub fn fatal(provider: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            provider,
            message: message.into(),
        }
    }

    /// Classify a failed HTTP exchange by status
    pub fn from_status(provider: &'static str, status: u16, message: impl Into<String>) -> Self {
        let kind = if status == 408 || status == 429 || status >= 500 {
            ErrorKind::Transient
        } else {
            ErrorKind::Fatal
        };
        Self {
            kind,
            provider,
            message: message.into(),
        }
    }

    /// Transport errors are transient unless the request itself was malformed
    pub fn from_request(provider: &'static str, e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::fatal(provider, format!("Invalid request: {}", e))
        } else {
            Self::transient(provider, format!("HTTP request failed: {}", e))
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.provider, self.message)
    }
}

impl std::error::Error for ModelError {}

/// The opaque model capability
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, used for metrics and logs
    fn name(&self) -> &str;

    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelError>;
}
