//! Spawning and supervising sandboxed `node` processes
//!
//! One [`Sandbox`] is shared by every request of the executor service. It
//! holds only immutable configuration and the compiled seccomp program;
//! each [`Sandbox::execute`] call owns its child process, pipes and output
//! buffers.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use seccompiler::BpfProgram;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::harness::{parse_report, stderr_tail, truncate_output, HARNESS_JS, MAX_OUTPUT_ENV};
use super::{ExecutionResult, ResourceLimits};
use crate::cgroups::CgroupManager;
use crate::metrics::{SANDBOX_DURATION, SANDBOX_EXECUTIONS};
use crate::security::{running_as_root, CapabilityDropper, SandboxSeccomp};

/// Executor-side sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter binary, resolved through the executor's `PATH`
    pub node_bin: String,
    pub limits: ResourceLimits,
    /// Run node under `--permission` with no grants
    pub node_permissions: bool,
    /// Place each child in its own cgroup v2 group
    pub use_cgroups: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            node_bin: "node".to_string(),
            limits: ResourceLimits::default(),
            node_permissions: true,
            use_cgroups: false,
        }
    }
}

/// Failures of the sandbox machinery itself (never of the snippet)
#[derive(Debug)]
pub enum SandboxError {
    /// Building the seccomp program or opening the cgroup namespace
    Setup(String),
    /// The interpreter could not be started
    Spawn(std::io::Error),
    /// Waiting on the child failed
    Wait(std::io::Error),
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxError::Setup(msg) => write!(f, "Sandbox setup failed: {}", msg),
            SandboxError::Spawn(e) => write!(f, "Failed to start interpreter: {}", e),
            SandboxError::Wait(e) => write!(f, "Failed to wait for interpreter: {}", e),
        }
    }
}

impl std::error::Error for SandboxError {}

/// How the child finished, before it is turned into an [`ExecutionResult`]
enum Outcome {
    Exited(ExitStatus),
    TimedOut,
}

/// Runs untrusted JavaScript in hardened, single-use `node` processes
pub struct Sandbox {
    config: SandboxConfig,
    seccomp: Arc<BpfProgram>,
    capabilities: Arc<CapabilityDropper>,
    cgroups: Option<CgroupManager>,
    /// Flag enabling node's permission model, detected at startup
    permission_flag: Option<&'static str>,
}

/// Spellings of the permission flag, newest first
const PERMISSION_FLAGS: [&str; 2] = ["--permission", "--experimental-permission"];

/// Find which permission flag the interpreter accepts
///
/// Older releases only know `--experimental-permission` and exit with
/// "bad option" on `--permission`.
fn detect_permission_flag(node_bin: &str) -> Result<&'static str, SandboxError> {
    for flag in PERMISSION_FLAGS {
        let status = std::process::Command::new(node_bin)
            .args([flag, "-e", ""])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| SandboxError::Setup(format!("cannot run interpreter {}: {}", node_bin, e)))?;
        if status.success() {
            return Ok(flag);
        }
        debug!(flag, %status, "Interpreter rejected permission flag");
    }
    Err(SandboxError::Setup(format!(
        "{} supports neither --permission nor --experimental-permission; \
         set SANDBOX_NODE_PERMISSIONS=false to run without the permission model",
        node_bin
    )))
}

impl Sandbox {
    /// Compile the seccomp program and open the cgroup namespace if asked to
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let seccomp = SandboxSeccomp::with_sandbox_defaults()
            .build()
            .map_err(|e| SandboxError::Setup(format!("seccomp: {}", e)))?;

        let permission_flag = if config.node_permissions {
            Some(detect_permission_flag(&config.node_bin)?)
        } else {
            None
        };

        let cgroups = if config.use_cgroups {
            let manager =
                CgroupManager::new().map_err(|e| SandboxError::Setup(format!("cgroups: {}", e)))?;
            Some(manager)
        } else {
            None
        };

        info!(
            node = %config.node_bin,
            timeout_ms = config.limits.timeout.as_millis() as u64,
            memory_mb = config.limits.memory_mb,
            permission_flag = permission_flag.unwrap_or("none"),
            cgroups = cgroups.is_some(),
            "Sandbox ready"
        );

        Ok(Self {
            config,
            seccomp: Arc::new(seccomp),
            capabilities: Arc::new(CapabilityDropper::with_sandbox_drops()),
            cgroups,
            permission_flag,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The permission flag passed to every interpreter, if any
    pub fn permission_flag(&self) -> Option<&'static str> {
        self.permission_flag
    }

    /// Run one snippet to completion
    ///
    /// Total: every failure, including failures to start the interpreter,
    /// comes back as an unsuccessful [`ExecutionResult`].
    pub async fn execute(&self, code: &str) -> ExecutionResult {
        let execution_id = Uuid::now_v7().to_string();
        let span = info_span!(
            "sandbox_execution",
            execution_id = %execution_id,
            code_bytes = code.len(),
        );

        async {
            let start = Instant::now();
            let (result, status) = match self.run(&execution_id, code).await {
                Ok((result, status)) => (result, status),
                Err(e) => {
                    warn!(error = %e, "Sandbox failure");
                    (ExecutionResult::failure(e.to_string()), "crashed")
                }
            };
            let elapsed = start.elapsed();

            SANDBOX_DURATION.observe(elapsed.as_secs_f64());
            SANDBOX_EXECUTIONS.with_label_values(&[status]).inc();
            info!(
                status,
                success = result.success,
                duration_ms = elapsed.as_millis() as u64,
                output_bytes = result.output.len(),
                "Execution finished"
            );

            let max = self.config.limits.max_output_bytes;
            ExecutionResult {
                success: result.success,
                output: truncate_output(result.output, max),
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        execution_id: &str,
        code: &str,
    ) -> Result<(ExecutionResult, &'static str), SandboxError> {
        let limits = &self.config.limits;
        let workdir = tempfile::tempdir().map_err(|e| SandboxError::Setup(format!("workdir: {}", e)))?;

        let mut command = self.command(workdir.path());
        let mut child = command.spawn().map_err(SandboxError::Spawn)?;
        let pid = child.id();
        debug!(pid, "Interpreter spawned");

        // The child is already running without its cgroup; a group that cannot
        // be set up only loses the kernel memory ceiling, so it is not fatal.
        let cgroup_id = match (&self.cgroups, pid) {
            (Some(cgroups), Some(pid)) => {
                match cgroups
                    .create(execution_id, limits)
                    .and_then(|_| cgroups.add_process(execution_id, pid))
                {
                    Ok(()) => Some(execution_id),
                    Err(e) => {
                        warn!(error = %e, "Failed to place interpreter in cgroup");
                        let _ = cgroups.destroy(execution_id);
                        None
                    }
                }
            }
            _ => None,
        };

        let capture = limits.pipe_capture_bytes();
        let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_tail(pipe, capture)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_tail(pipe, capture)));

        if let Some(mut stdin) = child.stdin.take() {
            let code = code.to_owned();
            // A child that dies early closes the pipe; that is reported
            // through its exit status, not here.
            tokio::spawn(async move {
                let _ = stdin.write_all(code.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let outcome = match tokio::time::timeout(limits.timeout, child.wait()).await {
            Ok(Ok(status)) => Outcome::Exited(status),
            Ok(Err(e)) => {
                kill_group(&mut child, pid).await;
                return Err(SandboxError::Wait(e));
            }
            Err(_) => {
                kill_group(&mut child, pid).await;
                Outcome::TimedOut
            }
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;

        let oom_killed = match (&self.cgroups, cgroup_id) {
            (Some(cgroups), Some(id)) => {
                let oom = cgroups.was_oom_killed(id);
                if let Err(e) = cgroups.destroy(id) {
                    warn!(error = %e, "Failed to remove cgroup");
                }
                oom
            }
            _ => false,
        };

        Ok(match outcome {
            Outcome::TimedOut => (
                ExecutionResult::failure(format!(
                    "Execution timed out after {}ms",
                    limits.timeout.as_millis()
                )),
                "timeout",
            ),
            Outcome::Exited(status) => match parse_report(&stdout) {
                Some(result) => {
                    let label = if result.success { "success" } else { "error" };
                    (result, label)
                }
                None => (
                    ExecutionResult::failure(describe_exit(status, &stderr, oom_killed, limits)),
                    "crashed",
                ),
            },
        })
    }

    fn command(&self, workdir: &std::path::Path) -> Command {
        let limits = self.config.limits.clone();
        let seccomp = Arc::clone(&self.seccomp);
        let capabilities = Arc::clone(&self.capabilities);
        let drop_caps = running_as_root();

        let mut command = Command::new(&self.config.node_bin);
        if let Some(flag) = self.permission_flag {
            command.arg(flag);
        }
        command
            .arg(format!("--max-old-space-size={}", limits.memory_mb))
            .arg("-e")
            .arg(HARNESS_JS)
            .env_clear()
            .env(MAX_OUTPUT_ENV, limits.max_output_bytes.to_string())
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            // Own process group so a timeout can kill anything the child forked
            .process_group(0);

        // PATH only, so a bare `node` still resolves
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        // SAFETY: pre_exec runs in the forked child before exec. It only
        // issues setrlimit, capset and seccomp syscalls on data prepared in
        // the parent.
        unsafe {
            command.pre_exec(move || {
                limits.apply_rlimits()?;
                if drop_caps {
                    capabilities.apply()?;
                }
                SandboxSeccomp::install(&seccomp)?;
                Ok(())
            });
        }

        command
    }
}

/// Kill the child's whole process group, then reap the child
async fn kill_group(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(error = %e, "killpg failed, process group already gone");
        }
    }
    let _ = child.kill().await;
}

/// Read a pipe to EOF, keeping only the last `cap` bytes
///
/// The harness report is the final line, so the tail is what matters; the
/// rest is drained so the child never blocks on a full pipe.
async fn read_tail<R: AsyncRead + Unpin>(mut pipe: R, cap: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&chunk[..n]);
                if kept.len() > cap.saturating_mul(2) {
                    let excess = kept.len() - cap;
                    kept.drain(..excess);
                }
            }
        }
    }
    if kept.len() > cap {
        let excess = kept.len() - cap;
        kept.drain(..excess);
    }
    kept
}

async fn collect(reader: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    match reader {
        Some(handle) => match tokio::time::timeout(Duration::from_secs(2), handle).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            _ => String::new(),
        },
        None => String::new(),
    }
}

/// Message for a child that exited without a harness report
fn describe_exit(status: ExitStatus, stderr: &str, oom_killed: bool, limits: &ResourceLimits) -> String {
    if oom_killed || stderr.contains("heap out of memory") {
        return format!("Execution exceeded the memory limit of {}MB", limits.memory_mb);
    }

    if let Some(signal) = status.signal() {
        if signal == libc::SIGXCPU {
            return format!("Execution exceeded the CPU time limit of {}s", limits.cpu_secs);
        }
        return format!("Execution terminated by signal {}", signal);
    }

    match (status.code(), stderr_tail(stderr)) {
        (Some(code), Some(tail)) => format!("Execution exited with status {}: {}", code, tail),
        (Some(code), None) => format!("Execution exited with status {} without a result", code),
        (None, _) => "Execution ended without a result".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_exit_status_code() {
        let status = ExitStatus::from_raw(3 << 8);
        let msg = describe_exit(status, "warning\nboom\n", false, &ResourceLimits::default());
        assert_eq!(msg, "Execution exited with status 3: boom");
    }

    #[test]
    fn test_describe_exit_cpu_limit() {
        let status = ExitStatus::from_raw(libc::SIGXCPU);
        let msg = describe_exit(status, "", false, &ResourceLimits::default());
        assert_eq!(msg, "Execution exceeded the CPU time limit of 5s");
    }

    #[test]
    fn test_describe_exit_memory() {
        let status = ExitStatus::from_raw(libc::SIGABRT);
        let stderr = "FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory";
        let msg = describe_exit(status, stderr, false, &ResourceLimits::default());
        assert_eq!(msg, "Execution exceeded the memory limit of 128MB");

        let killed = ExitStatus::from_raw(libc::SIGKILL);
        let msg = describe_exit(killed, "", true, &ResourceLimits::default());
        assert!(msg.contains("memory limit"));
    }

    #[tokio::test]
    async fn test_read_tail_keeps_last_bytes() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let kept = read_tail(&data[..], 1000).await;
        assert_eq!(kept.len(), 1000);
        assert_eq!(&kept[..], &data[data.len() - 1000..]);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_a_failed_result() {
        let sandbox = Sandbox::new(SandboxConfig {
            node_bin: "/nonexistent/agentvisor-node".to_string(),
            node_permissions: false,
            ..SandboxConfig::default()
        })
        .unwrap();

        let result = sandbox.execute("return 1").await;
        assert!(!result.success);
        assert!(result.output.starts_with("Error: Failed to start interpreter"));
    }

    /// Executable script standing in for an interpreter
    fn fake_interpreter(dir: &tempfile::TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-node");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_permission_flag_falls_back_to_experimental() {
        let dir = tempfile::tempdir().unwrap();
        let node = fake_interpreter(&dir, r#"[ "$1" = "--experimental-permission" ]"#);
        assert_eq!(detect_permission_flag(&node).unwrap(), "--experimental-permission");
    }

    #[test]
    fn test_permission_flag_prefers_stable() {
        let dir = tempfile::tempdir().unwrap();
        let node = fake_interpreter(&dir, "exit 0");
        let sandbox = Sandbox::new(SandboxConfig {
            node_bin: node,
            ..SandboxConfig::default()
        })
        .unwrap();
        assert_eq!(sandbox.permission_flag(), Some("--permission"));
    }

    #[test]
    fn test_unsupported_permission_model_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let node = fake_interpreter(&dir, "exit 9");
        let err = detect_permission_flag(&node).unwrap_err();
        assert!(err.to_string().contains("SANDBOX_NODE_PERMISSIONS=false"));

        let missing = Sandbox::new(SandboxConfig {
            node_bin: "/nonexistent/agentvisor-node".to_string(),
            ..SandboxConfig::default()
        });
        assert!(matches!(missing, Err(SandboxError::Setup(_))));
    }
}
