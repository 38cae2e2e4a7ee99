//! cgroup v2 placement for sandbox executions
//!
//! Each execution gets its own group under
//! `/sys/fs/cgroup/agentvisor/exec-{id}/` with `memory.max` and `cpu.max`
//! derived from its [`ResourceLimits`].
//!
//! ```text
//! /sys/fs/cgroup/
//! └── agentvisor/                 ← namespace (subtree_control: +cpu +memory)
//!     ├── exec-0192.../           ← one execution
//!     │   ├── cpu.max             ← "50000 100000" = half a core
//!     │   ├── memory.max          ← heap cap + interpreter overhead
//!     │   └── cgroup.procs        ← the node pid
//!     └── exec-0193.../
//! ```

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::sandbox::ResourceLimits;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

const CGROUP_NAMESPACE: &str = "agentvisor";

/// CPU period in microseconds (100ms)
const CPU_PERIOD_USEC: u64 = 100_000;

/// Creates, populates and removes per-execution cgroups
pub struct CgroupManager {
    base_path: PathBuf,
}

impl CgroupManager {
    /// Open (or create) the namespace under the default cgroup root
    ///
    /// Needs write access to the cgroup hierarchy, usually root or a
    /// delegated subtree.
    pub fn new() -> io::Result<Self> {
        Self::with_root(PathBuf::from(CGROUP_ROOT).join(CGROUP_NAMESPACE))
    }

    /// Open a namespace rooted at an arbitrary path
    pub fn with_root(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path)?;
        }

        // Children can only use controllers enabled in the parent
        fs::write(base_path.join("cgroup.subtree_control"), "+cpu +memory")?;

        Ok(Self { base_path })
    }

    fn group_path(&self, execution_id: &str) -> PathBuf {
        self.base_path.join(format!("exec-{}", execution_id))
    }

    /// Create the group for one execution and write its limits
    pub fn create(&self, execution_id: &str, limits: &ResourceLimits) -> io::Result<()> {
        let path = self.group_path(execution_id);
        fs::create_dir_all(&path)?;

        fs::write(path.join("cpu.max"), cpu_max(limits.cpu_cores))?;
        fs::write(path.join("memory.max"), limits.cgroup_memory_bytes().to_string())?;
        // No swap: hitting memory.max must OOM-kill, not page out
        let _ = fs::write(path.join("memory.swap.max"), "0");

        Ok(())
    }

    /// Move a process into the execution's group
    pub fn add_process(&self, execution_id: &str, pid: u32) -> io::Result<()> {
        fs::write(self.group_path(execution_id).join("cgroup.procs"), pid.to_string())
    }

    /// Remove the group; fails while processes are still inside
    pub fn destroy(&self, execution_id: &str) -> io::Result<()> {
        let path = self.group_path(execution_id);
        if path.exists() {
            // rmdir, not rm -rf: the kernel owns the control files
            fs::remove_dir(&path)?;
        }
        Ok(())
    }

    pub fn exists(&self, execution_id: &str) -> bool {
        self.group_path(execution_id).exists()
    }

    /// True if the group recorded at least one OOM kill
    pub fn was_oom_killed(&self, execution_id: &str) -> bool {
        fs::read_to_string(self.group_path(execution_id).join("memory.events"))
            .map(|events| oom_kills(&events) > 0)
            .unwrap_or(false)
    }
}

/// `cpu.max` line for a fractional core count
fn cpu_max(cpu_cores: f64) -> String {
    let quota = (cpu_cores * CPU_PERIOD_USEC as f64) as u64;
    format!("{} {}", quota.max(1000), CPU_PERIOD_USEC)
}

/// Parse `oom_kill` from a `memory.events` file
fn oom_kills(events: &str) -> u64 {
    events
        .lines()
        .filter_map(|line| line.strip_prefix("oom_kill "))
        .find_map(|value| value.trim().parse().ok())
        .unwrap_or(0)
}
