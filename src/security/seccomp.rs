//! Seccomp BPF denylist for sandbox children
//!
//! The interpreter needs a broad, version-dependent set of syscalls, so an
//! allowlist would be brittle. Instead we deny the syscalls untrusted code
//! must never reach and answer them with `EPERM`, which surfaces inside the
//! snippet as an ordinary JavaScript error instead of killing the process.
//!
//! ```text
//! snippet ── fetch() ──► connect(2) ──► filter ──► EPERM ──► rejected promise
//! snippet ── 1 + 1   ──► (no syscall)                      ──► Returned: 2
//! ```
//!
//! `execve` stays allowed: the filter is installed between fork and exec,
//! and the exec of the interpreter itself must succeed. Spawning further
//! processes is blocked by the interpreter's permission model.

use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};
use std::convert::TryInto;
use std::io;

/// Builder for the sandbox syscall denylist
pub struct SandboxSeccomp {
    /// Syscall numbers answered with EPERM
    denied_syscalls: Vec<i64>,
}

impl SandboxSeccomp {
    /// Empty denylist (allows everything)
    pub fn new() -> Self {
        Self {
            denied_syscalls: Vec::new(),
        }
    }

    /// Denylist used for every sandboxed execution
    pub fn with_sandbox_defaults() -> Self {
        let mut filter = Self::new();

        // Network: no outbound or inbound connections
        filter
            .deny(libc::SYS_connect)
            .deny(libc::SYS_bind)
            .deny(libc::SYS_listen)
            .deny(libc::SYS_accept)
            .deny(libc::SYS_accept4);

        // Debugging other processes
        filter
            .deny(libc::SYS_ptrace)
            .deny(libc::SYS_process_vm_readv)
            .deny(libc::SYS_process_vm_writev);

        // Filesystem topology
        filter
            .deny(libc::SYS_mount)
            .deny(libc::SYS_umount2)
            .deny(libc::SYS_pivot_root)
            .deny(libc::SYS_chroot);

        // Identity
        filter.deny(libc::SYS_setuid).deny(libc::SYS_setgid);

        // Kernel
        filter
            .deny(libc::SYS_init_module)
            .deny(libc::SYS_finit_module)
            .deny(libc::SYS_delete_module)
            .deny(libc::SYS_kexec_load)
            .deny(libc::SYS_reboot);

        filter
    }

    /// Add a syscall to the denylist
    pub fn deny(&mut self, syscall: i64) -> &mut Self {
        if !self.denied_syscalls.contains(&syscall) {
            self.denied_syscalls.push(syscall);
        }
        self
    }

    /// Compile the denylist to BPF for the running architecture
    ///
    /// Built once on the host; the child only calls [`SandboxSeccomp::install`].
    pub fn build(&self) -> Result<BpfProgram, io::Error> {
        // Empty rule vector = match the syscall unconditionally
        let rules: Vec<(i64, Vec<SeccompRule>)> = self
            .denied_syscalls
            .iter()
            .map(|&syscall| (syscall, vec![]))
            .collect();

        let arch: TargetArch = std::env::consts::ARCH
            .try_into()
            .map_err(|e: seccompiler::BackendError| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let filter = SeccompFilter::new(
            rules.into_iter().collect(),
            SeccompAction::Allow,
            SeccompAction::Errno(libc::EPERM as u32),
            arch,
        )
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        filter
            .try_into()
            .map_err(|e: seccompiler::BackendError| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    /// Install a compiled program on the current process
    ///
    /// Irreversible and inherited across exec. Also sets `NO_NEW_PRIVS`.
    pub fn install(program: &BpfProgram) -> Result<(), io::Error> {
        seccompiler::apply_filter(program).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    pub fn denied_count(&self) -> usize {
        self.denied_syscalls.len()
    }

    pub fn is_denied(&self, syscall: i64) -> bool {
        self.denied_syscalls.contains(&syscall)
    }
}

impl Default for SandboxSeccomp {
    fn default() -> Self {
        Self::with_sandbox_defaults()
    }
}
