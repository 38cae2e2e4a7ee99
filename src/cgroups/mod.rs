//! cgroups v2 resource isolation for sandbox executions
//!
//! rlimits cannot cap the resident memory of a V8 process reliably (it
//! reserves large virtual ranges up front), so when the executor is allowed
//! to manage cgroups every execution is placed in its own group with a hard
//! `memory.max`. Optional: enabled with `SANDBOX_CGROUPS=true`.
//!
//! ```ignore
//! let cgroups = CgroupManager::new()?;
//! cgroups.create(&execution_id, &limits)?;
//! cgroups.add_process(&execution_id, child_pid)?;
//! // ... wait for the child ...
//! cgroups.destroy(&execution_id)?;
//! ```

pub mod manager;

pub use manager::CgroupManager;
