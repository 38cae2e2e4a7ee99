//! Execution sandbox for untrusted JavaScript snippets
//!
//! Every call to [`Sandbox::execute`] spawns a fresh, locked-down `node`
//! process running a small harness. The harness owns the output sink for that
//! one execution, so concurrent executions never share capture state.
//!
//! # Architecture
//!
//! ```text
//! POST / {code} → sandbox::server → Sandbox::execute
//!                                        ↓
//!                     spawn node -e HARNESS (rlimits, seccomp, caps, cgroup)
//!                                        ↓
//!                     code → stdin → AsyncFunction(code) → console capture
//!                                        ↓
//!                     sentinel line on stdout → ExecutionResult
//! ```

pub mod harness;
pub mod limits;
pub mod runner;
pub mod server;

use serde::{Deserialize, Serialize};

pub use limits::ResourceLimits;
pub use runner::{Sandbox, SandboxConfig, SandboxError};

/// Outcome of one sandboxed execution
///
/// `output` is always present: captured console lines (plus a `Returned:`
/// line) on success, a single `Error: ...` line on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// Failure with the conventional `Error: ` prefix
    pub fn failure(message: impl AsRef<str>) -> Self {
        Self {
            success: false,
            output: format!("Error: {}", message.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_prefix() {
        let result = ExecutionResult::failure("boom");
        assert!(!result.success);
        assert_eq!(result.output, "Error: boom");
    }

    #[test]
    fn test_result_serialization() {
        let json = serde_json::to_value(ExecutionResult::success("Returned: 2")).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "output": "Returned: 2"}));
    }
}
