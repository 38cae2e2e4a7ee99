//! Linux capability dropping for sandbox children
//!
//! When the executor runs as root, a forked child inherits every capability.
//! Before exec'ing the interpreter we strip the ones that would let untrusted
//! code escape the other layers (mount, ptrace, raw sockets, setuid, ...).
//! As a non-root user the child starts with an empty set and this is a no-op.

use std::io;

/// Collects capabilities to remove and drops them from the current process
pub struct CapabilityDropper {
    caps_to_drop: Vec<caps::Capability>,
}

impl CapabilityDropper {
    pub fn new() -> Self {
        Self {
            caps_to_drop: Vec::new(),
        }
    }

    /// Capabilities a snippet interpreter never needs
    pub fn with_sandbox_drops() -> Self {
        let mut dropper = Self::new();

        // Namespaces, mounts, kernel
        dropper
            .drop_cap(caps::Capability::CAP_SYS_ADMIN)
            .drop_cap(caps::Capability::CAP_SYS_MODULE)
            .drop_cap(caps::Capability::CAP_SYS_BOOT)
            .drop_cap(caps::Capability::CAP_SYS_RAWIO)
            .drop_cap(caps::Capability::CAP_SYS_CHROOT)
            .drop_cap(caps::Capability::CAP_SYS_PTRACE)
            .drop_cap(caps::Capability::CAP_SYS_RESOURCE);

        // Network
        dropper
            .drop_cap(caps::Capability::CAP_NET_ADMIN)
            .drop_cap(caps::Capability::CAP_NET_RAW)
            .drop_cap(caps::Capability::CAP_NET_BIND_SERVICE);

        // Identity and ownership
        dropper
            .drop_cap(caps::Capability::CAP_SETUID)
            .drop_cap(caps::Capability::CAP_SETGID)
            .drop_cap(caps::Capability::CAP_SETPCAP)
            .drop_cap(caps::Capability::CAP_CHOWN)
            .drop_cap(caps::Capability::CAP_FOWNER)
            .drop_cap(caps::Capability::CAP_FSETID)
            .drop_cap(caps::Capability::CAP_DAC_OVERRIDE)
            .drop_cap(caps::Capability::CAP_DAC_READ_SEARCH)
            .drop_cap(caps::Capability::CAP_MKNOD);

        dropper
    }

    pub fn drop_cap(&mut self, cap: caps::Capability) -> &mut Self {
        self.caps_to_drop.push(cap);
        self
    }

    /// Drop from bounding, effective and permitted sets
    ///
    /// Bounding-set drops need CAP_SETPCAP, so they go first and are best
    /// effort. Effective must shrink before permitted: the kernel rejects a
    /// `capset` leaving effective outside permitted.
    pub fn apply(&self) -> Result<(), io::Error> {
        for &cap in &self.caps_to_drop {
            let _ = caps::drop(None, caps::CapSet::Bounding, cap);
        }

        for set in [caps::CapSet::Effective, caps::CapSet::Permitted] {
            for &cap in &self.caps_to_drop {
                caps::drop(None, set, cap)
                    .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()))?;
            }
        }

        Ok(())
    }

    pub fn drop_count(&self) -> usize {
        self.caps_to_drop.len()
    }

    pub fn contains(&self, cap: caps::Capability) -> bool {
        self.caps_to_drop.contains(&cap)
    }
}

impl Default for CapabilityDropper {
    fn default() -> Self {
        Self::with_sandbox_drops()
    }
}

/// True when the executor runs with euid 0 and children would inherit caps
pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropper_creation() {
        let dropper = CapabilityDropper::new();
        assert_eq!(dropper.drop_count(), 0);
    }

    #[test]
    fn test_sandbox_defaults() {
        let dropper = CapabilityDropper::with_sandbox_drops();
        assert!(dropper.drop_count() > 15);
        assert!(dropper.contains(caps::Capability::CAP_SYS_ADMIN));
        assert!(dropper.contains(caps::Capability::CAP_NET_RAW));
    }

    #[test]
    fn test_custom_drops() {
        let mut dropper = CapabilityDropper::new();
        dropper
            .drop_cap(caps::Capability::CAP_NET_RAW)
            .drop_cap(caps::Capability::CAP_SYS_ADMIN);
        assert_eq!(dropper.drop_count(), 2);
    }

    /// CapEff of a child whose pre_exec ran `apply`
    fn child_effective_caps(dropper: CapabilityDropper) -> u64 {
        use std::os::unix::process::CommandExt;

        let mut command = std::process::Command::new("sh");
        command.args(["-c", "grep CapEff /proc/self/status"]);
        unsafe {
            command.pre_exec(move || dropper.apply());
        }
        let output = command.output().expect("child should spawn after dropping caps");
        assert!(output.status.success());
        let text = String::from_utf8_lossy(&output.stdout);
        let hex = text.split_whitespace().last().unwrap();
        u64::from_str_radix(hex, 16).unwrap()
    }

    #[test]
    fn test_apply_in_child_spawns_and_drops() {
        let effective = child_effective_caps(CapabilityDropper::with_sandbox_drops());
        for cap in [caps::Capability::CAP_SYS_ADMIN, caps::Capability::CAP_NET_RAW] {
            assert_eq!(effective & (1u64 << cap.index()), 0, "{} still effective", cap);
        }
    }
}
