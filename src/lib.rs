//! AgentVisor - tool-using LLM agent with a sandboxed JavaScript executor
//!
//! Two services are built from this library:
//!
//! - `agentvisor` (gateway): HTTP front door that runs agent turns on named
//!   conversation threads
//! - `executor`: HTTP service that runs untrusted JavaScript in locked-down,
//!   short-lived `node` processes
//!
//! # Modules
//!
//! - `agent` - the per-turn reasoning loop over model, tools and memory
//! - `llm` - chat model providers (Anthropic, Ollama)
//! - `tools` - tool catalog, argument validation, weather and code tools
//! - `memory` - per-thread conversation history
//! - `gateway` - HTTP surface of the agent
//! - `sandbox` - JavaScript execution sandbox and its HTTP surface
//! - `cgroups` - optional cgroups v2 memory isolation for sandbox children
//! - `security` - seccomp filters, capability dropping, rate limiting
//! - `metrics` - Prometheus metrics for observability
//! - `config` - environment configuration for both services
//!
//! # Quick Start
//!
//! ```ignore
//! use agentvisor::{AgentConfig, AgentController, MemoryStore, ToolCatalog};
//!
//! let tools = ToolCatalog::new()
//!     .register(WeatherTool::new(api_key, DEFAULT_WEATHER_API_URL))
//!     .register(CodeExecutionTool::new(executor_url));
//! let agent = AgentController::new(model, tools, memory, AgentConfig::default());
//!
//! let reply = agent.run("thread-1", "What is 17 * 23?").await?;
//! ```

pub mod agent;
pub mod cgroups;
pub mod config;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod sandbox;
pub mod security;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentController, AgentError, AgentReply};
pub use llm::{ChatModel, ModelError, ModelReply, ToolCallRequest};
pub use memory::{MemoryConfig, MemoryStore, Role, Turn};
pub use sandbox::{ExecutionResult, ResourceLimits, Sandbox, SandboxConfig};
pub use tools::{Tool, ToolCatalog, ToolError, ToolOutput, ToolSpec};
