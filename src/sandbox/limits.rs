//! Resource ceilings for sandboxed executions
//!
//! Limits are enforced in three places: the wall-clock timeout on the host,
//! rlimits installed in the child between fork and exec, and (optionally) a
//! cgroup v2 group holding the child.

use std::time::Duration;

use nix::sys::resource::{setrlimit, Resource};

const MIB: u64 = 1024 * 1024;

/// Runtime overhead of the interpreter on top of its heap cap
const RUNTIME_OVERHEAD_MB: u64 = 64;

/// Resource limits for one execution
///
/// # CPU vs wall clock
///
/// `cpu_secs` bounds CPU time (`RLIMIT_CPU`, delivered as SIGXCPU), while
/// `timeout` bounds wall time, catching snippets that just sleep or await
/// a promise that never settles.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Wall-clock budget for the whole execution
    pub timeout: Duration,
    /// Heap ceiling handed to V8 (`--max-old-space-size`)
    pub memory_mb: u64,
    /// CPU seconds before the kernel signals the child
    pub cpu_secs: u64,
    /// CPU share when a cgroup is used
    pub cpu_cores: f64,
    /// Maximum open file descriptors
    pub max_open_files: u64,
    /// Output bytes kept in the reported result
    pub max_output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_mb: 128,
            cpu_secs: 5,
            cpu_cores: 1.0,
            max_open_files: 64,
            max_output_bytes: 64 * 1024,
        }
    }
}

impl ResourceLimits {
    /// Tight limits for tests and low-trust deployments
    pub fn small() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            memory_mb: 64,
            cpu_secs: 2,
            cpu_cores: 0.5,
            max_open_files: 32,
            max_output_bytes: 16 * 1024,
        }
    }

    /// Bytes a child may keep buffered on each pipe before we stop storing
    ///
    /// The report line is JSON, where one captured byte can expand to a
    /// six-byte `\uXXXX` escape, so the pipe keeps that much headroom.
    pub fn pipe_capture_bytes(&self) -> usize {
        self.max_output_bytes.saturating_mul(6) + 4096
    }

    /// `memory.max` for the cgroup: heap cap plus interpreter overhead
    pub fn cgroup_memory_bytes(&self) -> u64 {
        (self.memory_mb + RUNTIME_OVERHEAD_MB) * MIB
    }

    /// Install rlimits on the current process
    ///
    /// Called from `pre_exec` in the forked child, so it only issues
    /// `setrlimit` syscalls and never allocates.
    pub fn apply_rlimits(&self) -> std::io::Result<()> {
        let cpu = self.cpu_secs.max(1);
        setrlimit(Resource::RLIMIT_CPU, cpu, cpu + 1)?;
        setrlimit(Resource::RLIMIT_FSIZE, 0, 0)?;
        setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
        setrlimit(Resource::RLIMIT_NOFILE, self.max_open_files, self.max_open_files)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.timeout, Duration::from_secs(10));
        assert_eq!(limits.memory_mb, 128);
        assert_eq!(limits.max_output_bytes, 64 * 1024);
    }

    #[test]
    fn test_small_is_tighter() {
        let small = ResourceLimits::small();
        let default = ResourceLimits::default();
        assert!(small.timeout < default.timeout);
        assert!(small.memory_mb < default.memory_mb);
    }

    #[test]
    fn test_cgroup_memory_includes_overhead() {
        let limits = ResourceLimits {
            memory_mb: 100,
            ..ResourceLimits::default()
        };
        assert_eq!(limits.cgroup_memory_bytes(), 164 * MIB);
    }

    #[test]
    fn test_pipe_capture_exceeds_output_cap() {
        let limits = ResourceLimits::default();
        assert!(limits.pipe_capture_bytes() > limits.max_output_bytes);
    }
}
