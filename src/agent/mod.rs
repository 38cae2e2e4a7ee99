//! Agent module: the stateful reasoning loop
//!
//! # Architecture
//!
//! ```text
//! prompt → AgentController::run(thread_id)
//!              ↓  lock thread, append user turn
//!          ChatModel::complete(system, history, tool specs)
//!              ↓
//!          tool calls? ── no ──→ append assistant turn → reply
//!              ↓ yes
//!          ToolCatalog::invoke per call
//!              ↓  append tool-call + tool-result turns
//!          next round (bounded by max_tool_rounds)
//! ```

pub mod controller;

pub use controller::{AgentConfig, AgentController, AgentError, AgentReply};
