//! Security primitives for the sandbox and the gateway
//!
//! Layers applied to every sandbox child, in the forked child before exec:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ 1. rlimits         CPU seconds, no file writes, few fds     │
//! │ 2. capabilities    drop mount/ptrace/net/setuid (as root)   │
//! │ 3. seccomp         EPERM on network, ptrace, mount, modules │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ exec
//!                              ▼
//!            node --permission (no fs / child_process grants)
//! ```
//!
//! The gateway side only needs the [`RateLimiter`].

pub mod capabilities;
pub mod rate_limit;
pub mod seccomp;

pub use capabilities::{running_as_root, CapabilityDropper};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use seccomp::SandboxSeccomp;
