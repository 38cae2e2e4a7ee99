//! Anthropic Messages API provider
//!
//! Turns map onto Messages API content blocks:
//!
//! ```text
//! user         → user      [text]
//! assistant    → assistant [text]
//! tool-call    → assistant [tool_use {id, name, input}]
//! tool-result  → user      [tool_result {tool_use_id, content, is_error}]
//! ```
//!
//! Consecutive turns with the same API role are merged into one message,
//! since the API requires roles to alternate.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ChatModel, ModelError, ModelReply, ToolCallRequest};
use crate::memory::{Role, Turn};
use crate::tools::ToolSpec;

const PROVIDER: &str = "anthropic";

const API_VERSION: &str = "2023-06-01";

pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-haiku-20240307";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_ANTHROPIC_URL.to_string(),
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            max_tokens: 1024,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Block types this client does not use (e.g. thinking)
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct ToolDefinition {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Claude through the Messages API
pub struct AnthropicModel {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicModel {
    pub fn new(config: AnthropicConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::fatal(PROVIDER, format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages: to_messages(history),
            tools: tools
                .iter()
                .map(|spec| ToolDefinition {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    input_schema: spec.json_schema(),
                })
                .collect(),
        };

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::from_request(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::from_status(
                PROVIDER,
                status.as_u16(),
                error_message(status.as_u16(), &body),
            ));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ModelError::fatal(PROVIDER, format!("Failed to parse response: {}", e)))?;
        debug!(stop_reason = ?body.stop_reason, blocks = body.content.len(), "Anthropic reply");

        Ok(to_reply(body.content))
    }
}

/// Render history as alternating API messages
fn to_messages(history: &[Turn]) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();

    for turn in history {
        let (role, block) = match turn.role {
            Role::User => ("user", ContentBlock::Text { text: turn.content.clone() }),
            Role::Assistant => {
                // The API rejects empty text blocks
                if turn.content.trim().is_empty() {
                    continue;
                }
                ("assistant", ContentBlock::Text { text: turn.content.clone() })
            }
            Role::ToolCall => (
                "assistant",
                ContentBlock::ToolUse {
                    id: turn.tool_call_id.clone().unwrap_or_default(),
                    name: turn.tool_name.clone().unwrap_or_default(),
                    input: turn
                        .arguments
                        .clone()
                        .or_else(|| serde_json::from_str(&turn.content).ok())
                        .unwrap_or_else(|| Value::Object(Default::default())),
                },
            ),
            Role::ToolResult => (
                "user",
                ContentBlock::ToolResult {
                    tool_use_id: turn.tool_call_id.clone().unwrap_or_default(),
                    content: turn.content.clone(),
                    is_error: turn.is_error,
                },
            ),
        };

        match messages.last_mut() {
            Some(last) if last.role == role => last.content.push(block),
            _ => messages.push(Message {
                role,
                content: vec![block],
            }),
        }
    }

    messages
}

fn to_reply(content: Vec<ContentBlock>) -> ModelReply {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCallRequest {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
        }
    }

    ModelReply {
        text: texts.join("\n"),
        tool_calls,
    }
}

/// `"<type>: <message>"` from an API error body, else the status and body
fn error_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    match (
        error.and_then(|e| e.get("type")).and_then(Value::as_str),
        error.and_then(|e| e.get("message")).and_then(Value::as_str),
    ) {
        (Some(kind), Some(message)) => format!("{}: {}", kind, message),
        (None, Some(message)) => message.to_string(),
        _ => format!("HTTP {}: {}", status, body),
    }
}
