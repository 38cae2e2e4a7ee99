//! Remote JavaScript execution through the executor service

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{ParamKind, ParamSpec, Tool, ToolError, ToolInput, ToolOutput, ToolSpec};
use crate::sandbox::server::ExecuteResponse;

pub const TOOL_NAME: &str = "run_javascript_code_tool";

/// Upper bound on one round trip to the executor (its own timeout plus slack)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The `run_javascript_code_tool` tool
///
/// Content is the executor's `result` object serialized verbatim, so the
/// model sees both the output and whether the snippet succeeded.
pub struct CodeExecutionTool {
    spec: ToolSpec,
    executor_url: Option<String>,
    client: reqwest::Client,
}

impl CodeExecutionTool {
    pub fn new(executor_url: Option<String>) -> Self {
        let spec = ToolSpec::new(
            TOOL_NAME,
            "Run general purpose javascript code. This can be used to do any computation that \
             you need. The output will be composed of everything the code logs to the console, \
             plus its return value. The code is the body of an async function executed in a \
             node environment, so top-level await and return are allowed.",
        )
        .param(ParamSpec::required("code", ParamKind::String, "The code to run"));

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            spec,
            executor_url: executor_url.filter(|u| !u.trim().is_empty()),
            client,
        }
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let url = self
            .executor_url
            .as_deref()
            .ok_or_else(|| ToolError::failed(TOOL_NAME, "EXECUTOR_URL is not configured"))?;
        let code = input.get("code").and_then(Value::as_str).unwrap_or_default();
        debug!(code_bytes = code.len(), "Sending code to executor");

        let response = self
            .client
            .post(url)
            .json(&json!({ "code": code }))
            .send()
            .await
            .map_err(|e| ToolError::failed(TOOL_NAME, format!("executor unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::failed(
                TOOL_NAME,
                format!("executor returned HTTP {}", status.as_u16()),
            ));
        }

        let body: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| ToolError::failed(TOOL_NAME, format!("malformed executor response: {}", e)))?;

        let content = serde_json::to_string(&body.result)
            .map_err(|e| ToolError::failed(TOOL_NAME, e.to_string()))?;

        Ok(ToolOutput {
            success: body.result.success,
            content,
        })
    }
}
