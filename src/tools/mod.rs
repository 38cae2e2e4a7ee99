//! Tool catalog: named, schema-validated capabilities for the agent
//!
//! ```text
//! model tool call {name, arguments}
//!        │
//!        ▼
//! ToolCatalog::invoke ── unknown name ──────────► ToolError::NotFound
//!        │ ToolSpec::validate ── bad arguments ──► ToolError::Validation
//!        ▼
//! Tool::call ── infrastructure failure ─────────► ToolError::Failed
//!        │
//!        ▼
//! ToolOutput { success, content }
//! ```
//!
//! Arguments are checked strictly: only declared parameters, exact JSON
//! types, no coercion.

pub mod code;
pub mod weather;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info_span, warn, Instrument};

use crate::metrics::AGENT_TOOL_CALLS;

pub use code::CodeExecutionTool;
pub use weather::WeatherTool;

/// Validated tool arguments
pub type ToolInput = Map<String, Value>;

/// Primitive parameter types a tool may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Name, description and input schema of a tool
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// JSON Schema for the arguments object, as model providers expect it
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({ "type": p.kind.as_str(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check raw arguments against the declared parameters
    ///
    /// `null` for an optional parameter counts as absent.
    pub fn validate(&self, raw: Value) -> Result<ToolInput, ToolError> {
        let invalid = |message: String| ToolError::Validation {
            tool: self.name.clone(),
            message,
        };

        let mut input = match raw {
            Value::Object(map) => map,
            other => {
                return Err(invalid(format!(
                    "expected a JSON object, got {}",
                    json_type(&other)
                )))
            }
        };

        if let Some(unknown) = input
            .keys()
            .find(|key| !self.params.iter().any(|p| &p.name == *key))
        {
            return Err(invalid(format!("unknown parameter '{}'", unknown)));
        }

        for param in &self.params {
            match input.get(&param.name).filter(|v| !v.is_null()) {
                None if param.required => {
                    return Err(invalid(format!("missing required parameter '{}'", param.name)));
                }
                Some(value) if !param.kind.accepts(value) => {
                    return Err(invalid(format!(
                        "parameter '{}' must be {}, got {}",
                        param.name,
                        param.kind.as_str(),
                        json_type(value)
                    )));
                }
                _ => {}
            }
        }
        input.retain(|_, value| !value.is_null());

        Ok(input)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// What a tool hands back to the agent loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub success: bool,
    pub content: String,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
        }
    }
}

/// Error type for tool dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    NotFound(String),
    Validation { tool: String, message: String },
    Failed { tool: String, message: String },
}

impl ToolError {
    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError::Failed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Unknown tool: {}", name),
            ToolError::Validation { tool, message } => {
                write!(f, "Invalid arguments for {}: {}", tool, message)
            }
            ToolError::Failed { tool, message } => write!(f, "{} failed: {}", tool, message),
        }
    }
}

impl std::error::Error for ToolError {}

/// A capability the agent can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// Run the tool on arguments that already passed [`ToolSpec::validate`]
    async fn call(&self, input: ToolInput) -> Result<ToolOutput, ToolError>;
}

/// The set of tools offered to the model, keyed by unique name
#[derive(Default, Clone)]
pub struct ToolCatalog {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; a tool with the same name is replaced in place
    pub fn register(mut self, tool: impl Tool + 'static) -> Self {
        let name = tool.spec().name.clone();
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.by_name.get(&name) {
            Some(&index) => {
                warn!(tool = %name, "Replacing tool with duplicate name");
                self.tools[index] = tool;
            }
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
        self
    }

    pub fn resolve(&self, name: &str) -> Option<&dyn Tool> {
        self.by_name.get(name).map(|&i| self.tools[i].as_ref())
    }

    /// Specs in registration order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve, validate and call a tool
    pub async fn invoke(&self, name: &str, raw_input: Value) -> Result<ToolOutput, ToolError> {
        let span = info_span!("tool_call", tool = %name);
        async {
            let start = Instant::now();
            let result = self.dispatch(name, raw_input).await;

            let status = match &result {
                Ok(output) if output.success => "success",
                Ok(_) => "failure",
                Err(ToolError::NotFound(_)) => "not_found",
                Err(ToolError::Validation { .. }) => "invalid",
                Err(ToolError::Failed { .. }) => "error",
            };
            AGENT_TOOL_CALLS.with_label_values(&[name, status]).inc();
            debug!(status, duration_ms = start.elapsed().as_millis() as u64, "Tool finished");

            result
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, name: &str, raw_input: Value) -> Result<ToolOutput, ToolError> {
        let tool = self
            .resolve(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let input = tool.spec().validate(raw_input)?;
        tool.call(input).await
    }
}
