//! Conversation memory: per-thread turn logs
//!
//! The agent loop loads a thread's full history before every model call and
//! appends to it as the turn progresses. State lives for the lifetime of the
//! process only.

pub mod store;
pub mod turn;

pub use store::{MemoryConfig, MemoryStats, MemoryStore, ThreadGuard};
pub use turn::{Role, Turn};
