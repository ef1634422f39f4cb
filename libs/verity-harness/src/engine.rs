/// Sandbox Engines - Isolated Execution of the Companion Driver
///
/// **Core Responsibility:**
/// Run the trusted driver against one submission and its case plan, and
/// return raw process output.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to isolate (local process, container)
/// - Engine does NOT parse the driver's report
/// - Engine does NOT evaluate correctness
///
/// **Guarantees (every engine):**
/// - One wall-clock timeout over the whole submission
/// - The child is killed on timeout or when its output passes the cap
/// - Scratch files and containers are removed on every exit path

use crate::config::{Backend, HarnessConfig};
use crate::docker::DockerSandbox;
use anyhow::{Context, Result};
use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// The trusted companion module every sandbox runs.
pub const DRIVER_SOURCE: &str = include_str!("../guest/driver.py");

/// What a sandbox needs to run one submission.
#[derive(Debug, Clone)]
pub struct Payload {
    pub source: String,
    /// Serialized `GuestPlan`.
    pub plan: String,
}

/// Raw outcome of one sandboxed run
#[derive(Debug, Clone, Default)]
pub struct SandboxOutput {
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// stdout or stderr passed the output cap and the run was killed.
    pub output_exceeded: bool,
    pub elapsed_ms: u64,
}

impl SandboxOutput {
    pub fn exited_cleanly(&self) -> bool {
        !self.timed_out && !self.output_exceeded && self.exit_code == Some(0)
    }
}

pub const OUTPUT_LIMIT_MARKER: &str = "[Output limit exceeded]";

/// Accumulates one output stream up to a byte cap.
#[derive(Debug)]
pub struct CappedBuffer {
    bytes: Vec<u8>,
    cap: usize,
    overflowed: bool,
}

impl CappedBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            overflowed: false,
        }
    }

    /// Append a chunk; returns `false` once the cap has been passed.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.overflowed = true;
        } else {
            self.bytes.extend_from_slice(chunk);
        }
        !self.overflowed
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    /// Largest `source` or `plan` this sandbox can deliver, in bytes.
    fn payload_limit(&self) -> Option<usize> {
        None
    }

    /// `Err` only for infrastructure failures; timeouts and crashes of the
    /// submission are reported in the output.
    fn run(&self, payload: &Payload, timeout: Duration) -> impl Future<Output = Result<SandboxOutput>> + Send;
}

/// Sandbox selected by configuration.
pub enum SandboxBackend {
    Process(ProcessSandbox),
    Docker(DockerSandbox),
}

impl SandboxBackend {
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        Ok(match config.backend {
            Backend::Process => SandboxBackend::Process(ProcessSandbox::from_config(config)),
            Backend::Docker => SandboxBackend::Docker(DockerSandbox::from_config(config)?),
        })
    }
}

impl Sandbox for SandboxBackend {
    fn name(&self) -> &'static str {
        match self {
            SandboxBackend::Process(s) => s.name(),
            SandboxBackend::Docker(s) => s.name(),
        }
    }

    fn payload_limit(&self) -> Option<usize> {
        match self {
            SandboxBackend::Process(s) => s.payload_limit(),
            SandboxBackend::Docker(s) => s.payload_limit(),
        }
    }

    async fn run(&self, payload: &Payload, timeout: Duration) -> Result<SandboxOutput> {
        match self {
            SandboxBackend::Process(s) => s.run(payload, timeout).await,
            SandboxBackend::Docker(s) => s.run(payload, timeout).await,
        }
    }
}

/// POSIX limits applied to the child before exec.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub address_space_bytes: u64,
    pub cpu_seconds: u64,
    pub file_size_bytes: u64,
    pub max_processes: u64,
}

impl ResourceLimits {
    fn apply(&self) -> std::io::Result<()> {
        let limits = [
            (libc::RLIMIT_AS, self.address_space_bytes),
            (libc::RLIMIT_CPU, self.cpu_seconds),
            (libc::RLIMIT_FSIZE, self.file_size_bytes),
            (libc::RLIMIT_NPROC, self.max_processes),
        ];
        for (resource, value) in limits {
            let limit = libc::rlimit {
                rlim_cur: value as libc::rlim_t,
                rlim_max: value as libc::rlim_t,
            };
            if unsafe { libc::setrlimit(resource, &limit) } != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

/// Local-process sandbox
///
/// **Isolation:**
/// - `python -I` (no user site, no environment-driven imports)
/// - Cleared environment, null stdin, fresh scratch directory as cwd
/// - Address-space, CPU-time, file-size and process-count rlimits
/// - Driver audit hook refusing sockets, subprocesses and file access
///   outside the scratch directory and the interpreter's own tree
/// - stdout and stderr each capped at `max_output_bytes`
pub struct ProcessSandbox {
    python: String,
    memory_limit_mb: u32,
    max_file_size_mb: u32,
    max_processes: u32,
    max_output_bytes: usize,
}

impl ProcessSandbox {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            python: config.python.clone(),
            memory_limit_mb: config.memory_limit_mb,
            max_file_size_mb: config.max_file_size_mb,
            max_processes: config.max_processes,
            max_output_bytes: config.max_output_bytes,
        }
    }

    fn limits(&self, timeout: Duration) -> ResourceLimits {
        ResourceLimits {
            address_space_bytes: u64::from(self.memory_limit_mb) * 1024 * 1024,
            // CPU time can only trail wall-clock time; round up and add a second
            cpu_seconds: timeout.as_secs() + 2,
            file_size_bytes: u64::from(self.max_file_size_mb) * 1024 * 1024,
            max_processes: u64::from(self.max_processes),
        }
    }
}

/// Read a child pipe into a capped buffer, SIGKILLing `pid` once the cap is
/// passed so the other pipe reaches EOF.
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>, cap: usize, pid: Option<u32>) -> std::io::Result<CappedBuffer> {
    let mut buffer = CappedBuffer::new(cap);
    let Some(pipe) = pipe else { return Ok(buffer) };

    let mut bytes = Vec::new();
    pipe.take(cap as u64 + 1).read_to_end(&mut bytes).await?;
    if !buffer.push(&bytes) {
        if let Some(pid) = pid {
            // Not yet reaped, so the pid still names our child
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    Ok(buffer)
}

impl Sandbox for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    #[tracing::instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
    async fn run(&self, payload: &Payload, timeout: Duration) -> Result<SandboxOutput> {
        // Removed when dropped, whichever way this function returns
        let scratch = tempfile::Builder::new()
            .prefix("verity-")
            .tempdir()
            .context("Failed to create sandbox scratch directory")?;

        for (name, content) in [
            ("driver.py", DRIVER_SOURCE),
            ("submission.py", payload.source.as_str()),
            ("plan.json", payload.plan.as_str()),
        ] {
            tokio::fs::write(scratch.path().join(name), content)
                .await
                .with_context(|| format!("Failed to write {}", name))?;
        }

        let limits = self.limits(timeout);
        let mut cmd = tokio::process::Command::new(&self.python);
        cmd.args(["-I", "-S", "driver.py", "submission.py", "plan.json"])
            .current_dir(scratch.path())
            .env_clear()
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // setrlimit is async-signal-safe
        unsafe {
            cmd.pre_exec(move || limits.apply());
        }

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.python))?;
        let pid = child.id();
        debug!(pid, "Sandbox process started");

        let cap = self.max_output_bytes;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let execution = async {
            let (stdout, stderr) = tokio::try_join!(
                read_capped(stdout_pipe, cap, pid),
                read_capped(stderr_pipe, cap, pid)
            )?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };
        let result = tokio::time::timeout(timeout, execution).await;

        match result {
            Ok(output) => {
                let (status, stdout, stderr) = output.context("Failed to collect sandbox output")?;
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let exit_code = status.code().map(i64::from);
                let output_exceeded = stdout.overflowed() || stderr.overflowed();
                let mut stderr = stderr.into_string();
                if output_exceeded {
                    warn!(cap, "⚠ Sandbox output passed the cap - killed");
                    stderr.push('\n');
                    stderr.push_str(OUTPUT_LIMIT_MARKER);
                }
                info!(exit_code = ?exit_code, elapsed_ms, "Sandbox process exited");

                Ok(SandboxOutput {
                    exit_code,
                    stdout: stdout.into_string(),
                    stderr,
                    timed_out: false,
                    output_exceeded,
                    elapsed_ms,
                })
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "⚠ Failed to kill timed-out sandbox process");
                }
                warn!(timeout_ms = timeout.as_millis() as u64, "⚠ Sandbox process timed out - killed");
                Ok(SandboxOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::from("[Execution timed out]"),
                    timed_out: true,
                    output_exceeded: false,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_is_embedded() {
        assert!(DRIVER_SOURCE.contains("def main("));
    }

    #[test]
    fn test_limits_follow_config() {
        let config = HarnessConfig {
            memory_limit_mb: 128,
            ..HarnessConfig::default()
        };
        let limits = ProcessSandbox::from_config(&config).limits(Duration::from_millis(2500));
        assert_eq!(limits.address_space_bytes, 128 * 1024 * 1024);
        assert_eq!(limits.cpu_seconds, 4);
    }

    #[test]
    fn test_exited_cleanly() {
        let ok = SandboxOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(ok.exited_cleanly());

        let killed = SandboxOutput {
            timed_out: true,
            ..Default::default()
        };
        assert!(!killed.exited_cleanly());

        let flooded = SandboxOutput {
            exit_code: Some(0),
            output_exceeded: true,
            ..Default::default()
        };
        assert!(!flooded.exited_cleanly());
    }

    #[test]
    fn test_capped_buffer_stops_at_cap() {
        let mut buffer = CappedBuffer::new(5);
        assert!(buffer.push(b"abc"));
        assert!(!buffer.overflowed());
        assert!(!buffer.push(b"defg"));
        assert!(buffer.overflowed());
        assert_eq!(buffer.into_string(), "abcde");
    }

    #[tokio::test]
    async fn test_read_capped_truncates_pipe() {
        let pipe: &[u8] = b"0123456789";
        let buffer = read_capped(Some(pipe), 4, None).await.unwrap();
        assert!(buffer.overflowed());
        assert_eq!(buffer.into_string(), "0123");

        let pipe: &[u8] = b"0123";
        let buffer = read_capped(Some(pipe), 4, None).await.unwrap();
        assert!(!buffer.overflowed());
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_infrastructure_error() {
        let sandbox = ProcessSandbox::from_config(&HarnessConfig {
            python: "/nonexistent/python3".to_string(),
            ..HarnessConfig::default()
        });
        let payload = Payload {
            source: "def f(): pass".to_string(),
            plan: "{}".to_string(),
        };
        let err = sandbox.run(&payload, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
