//! Ollama Chat API provider with tool calling support
//!
//! Uses the native `tool_calls` field of `/api/chat`. Smaller models often
//! write the call as JSON in the reply text instead, so when no native calls
//! come back the text is scanned for `{"name": ..., "arguments": {...}}`
//! objects naming an offered tool.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{ChatModel, ModelError, ModelReply, ToolCallRequest};
use crate::memory::{Role, Turn};
use crate::tools::ToolSpec;

const PROVIDER: &str = "ollama";

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub const DEFAULT_OLLAMA_MODEL: &str = "qwen3";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Which tool produced a "tool" message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_name: None,
        }
    }
}

/// A tool call from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// Tool definition for the model
#[derive(Debug, Clone, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    tool_type: &'static str, // Always "function"
    function: ToolFunction,
}

#[derive(Debug, Clone, Serialize)]
struct ToolFunction {
    name: String,
    description: String,
    parameters: Value, // JSON Schema
}

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    eval_count: u32,
}

/// Local models through Ollama
pub struct OllamaModel {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: OllamaConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::fatal(PROVIDER, format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ChatModel for OllamaModel {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelError> {
        let endpoint = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));

        let mut messages = vec![ChatMessage::new("system", system)];
        messages.extend(history.iter().map(to_message));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": 0.0
            }
        });
        if !tools.is_empty() {
            let definitions: Vec<Tool> = tools.iter().map(to_definition).collect();
            body["tools"] = serde_json::to_value(definitions)
                .map_err(|e| ModelError::fatal(PROVIDER, e.to_string()))?;
        }

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::from_request(PROVIDER, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::from_request(PROVIDER, e))?;

        if !status.is_success() {
            return Err(ModelError::from_status(
                PROVIDER,
                status.as_u16(),
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }
        if text.is_empty() {
            return Err(ModelError::transient(PROVIDER, "Empty response from Ollama"));
        }

        let chat: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ModelError::fatal(PROVIDER, format!("Parse error: {}", e)))?;
        debug!(eval_count = chat.eval_count, "Ollama reply");

        Ok(to_reply(chat.message, tools))
    }
}

fn to_definition(spec: &ToolSpec) -> Tool {
    Tool {
        tool_type: "function",
        function: ToolFunction {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.json_schema(),
        },
    }
}

fn to_message(turn: &Turn) -> ChatMessage {
    match turn.role {
        Role::User => ChatMessage::new("user", turn.content.clone()),
        Role::Assistant => ChatMessage::new("assistant", turn.content.clone()),
        Role::ToolCall => ChatMessage {
            tool_calls: Some(vec![ToolCall {
                function: FunctionCall {
                    name: turn.tool_name.clone().unwrap_or_default(),
                    arguments: turn.arguments.clone().unwrap_or(Value::Null),
                },
            }]),
            ..ChatMessage::new("assistant", "")
        },
        Role::ToolResult => ChatMessage {
            tool_name: turn.tool_name.clone(),
            ..ChatMessage::new("tool", turn.content.clone())
        },
    }
}

/// Native tool calls first, then calls embedded in the text
fn to_reply(message: ChatMessage, tools: &[ToolSpec]) -> ModelReply {
    let calls = match message.tool_calls.filter(|calls| !calls.is_empty()) {
        Some(calls) => calls,
        None => parse_tool_calls_from_text(&message.content)
            .into_iter()
            .filter(|call| tools.iter().any(|t| t.name == call.function.name))
            .collect(),
    };

    // Text that only carried the embedded call is not an answer
    let text = if !calls.is_empty() && message.content.trim_start().starts_with('{') {
        String::new()
    } else {
        message.content
    };

    ModelReply {
        text,
        tool_calls: calls
            .into_iter()
            .map(|call| ToolCallRequest {
                // Ollama does not assign call ids
                id: format!("call_{}", Uuid::now_v7().simple()),
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect(),
    }
}

/// Try to parse tool calls from the response content text
///
/// This handles models that output tool calls as JSON in the text
/// instead of using the native tool_calls field.
pub fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let mut tool_calls = Vec::new();
    let content = content.trim();

    if let Some(tool_call) = try_parse_tool_call(content) {
        tool_calls.push(tool_call);
        return tool_calls;
    }

    // Look for balanced {...} spans that might be tool calls
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Some(tool_call) = try_parse_tool_call(&content[s..=i]) {
                            tool_calls.push(tool_call);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    tool_calls
}

fn try_parse_tool_call(json_str: &str) -> Option<ToolCall> {
    if let Ok(value) = serde_json::from_str::<Value>(json_str) {
        return parse_tool_call_from_value(&value);
    }

    // Models often leave quotes inside a "code" string unescaped
    let fixed = try_fix_malformed_json(json_str)?;
    let value = serde_json::from_str::<Value>(&fixed).ok()?;
    parse_tool_call_from_value(&value)
}

/// Escape bare double quotes inside a `"code": "..."` value
///
/// Pattern: `{"name": "run_javascript_code_tool", "arguments": {"code": "console.log("hi")"}}`
fn try_fix_malformed_json(json_str: &str) -> Option<String> {
    let code_marker = "\"code\": \"";
    let code_start = json_str.find(code_marker)?;
    let code_value_start = code_start + code_marker.len();

    // The code value ends right before the braces closing arguments and call
    let remaining = &json_str[code_value_start..];
    let end_pattern = remaining.rfind("\"}}")?;
    let code_content = &remaining[..end_pattern];

    let escaped_code = code_content
        .replace("\\\"", "\u{FFFF}") // Temporarily replace already-escaped quotes
        .replace('"', "\\\"")
        .replace('\u{FFFF}', "\\\"");

    let prefix = &json_str[..code_value_start];
    let suffix = &json_str[code_value_start + end_pattern..];

    Some(format!("{}{}{}", prefix, escaped_code, suffix))
}

/// Accepts `{"name", "arguments"}` and the `{"name", "parameters"}` variant
/// some models emit, where each value may be wrapped as `{"value": ...}`
fn parse_tool_call_from_value(value: &Value) -> Option<ToolCall> {
    let name = value.get("name").and_then(Value::as_str)?;

    let arguments = if let Some(args) = value.get("arguments") {
        args.clone()
    } else if let Some(Value::Object(params)) = value.get("parameters") {
        let unwrapped = params
            .iter()
            .map(|(key, param)| {
                let inner = param.get("value").cloned().unwrap_or_else(|| param.clone());
                (key.clone(), inner)
            })
            .collect();
        Value::Object(unwrapped)
    } else {
        return None;
    };

    Some(ToolCall {
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    })
}
