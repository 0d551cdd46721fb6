//! Builder for executing external tool commands under a hard deadline.
//!
//! Each command runs in its own process group. When the deadline passes or
//! the caller cancels, the whole group receives SIGTERM, then SIGKILL once the
//! grace period runs out. Stdout and stderr are drained concurrently so a
//! chatty process never blocks on a full pipe; only the tail of each stream is
//! kept.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use mediaforge_common::{Error, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default time between SIGTERM and SIGKILL.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Default number of bytes kept from each output stream.
const DEFAULT_OUTPUT_LIMIT: usize = 16 * 1024;

/// How long to wait for the output readers once the process is gone.
const READER_DRAIN: Duration = Duration::from_secs(2);

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The process exited on its own.
    Exited,
    /// The deadline passed and the process group was terminated.
    TimedOut,
    /// The cancellation token fired and the process group was terminated.
    Cancelled,
}

/// Outcome of a tool execution.
///
/// A non-zero exit is not an error at this level; callers decide what counts
/// as success.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Exit code, absent when the process died from a signal.
    pub exit_code: Option<i32>,
    /// Tail of standard output (lossy UTF-8).
    pub truncated_stdout: String,
    /// Tail of standard error (lossy UTF-8).
    pub truncated_stderr: String,
    /// Wall-clock time from spawn to exit.
    pub duration_ms: u64,
    /// How the process ended.
    pub termination: Termination,
}

impl ExecutionResult {
    /// Exited on its own with status 0.
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == Some(0)
    }

    /// Last non-empty stderr line, for compact error messages.
    pub fn last_stderr_line(&self) -> Option<&str> {
        self.truncated_stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use mediaforge_av::ToolCommand;
/// use std::path::PathBuf;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> mediaforge_common::Result<()> {
/// let result = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("error")
///     .arg("-show_streams")
///     .arg("/path/to/clip.mp4")
///     .timeout(Duration::from_secs(30))
///     .execute(&CancellationToken::new())
///     .await?;
/// println!("{}", result.truncated_stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    grace: Duration,
    output_limit: usize,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            grace: DEFAULT_GRACE,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Set the delay between SIGTERM and SIGKILL.
    pub fn grace_period(&mut self, d: Duration) -> &mut Self {
        self.grace = d;
        self
    }

    /// Set how many trailing bytes of each output stream are kept.
    pub fn output_limit(&mut self, bytes: usize) -> &mut Self {
        self.output_limit = bytes;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command until it exits, times out, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tool`] if the process cannot be spawned or waited on.
    /// Timeouts, cancellation and non-zero exits are reported through
    /// [`ExecutionResult`].
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<ExecutionResult> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::debug!(tool = %program_name, args = ?self.args, "spawning");
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::tool(&program_name, format!("failed to spawn: {e}")))?;
        // The id is gone once the child is reaped, and it doubles as the group id.
        let group = child.id();

        let stdout = spawn_tail_reader(child.stdout.take(), self.output_limit);
        let stderr = spawn_tail_reader(child.stderr.take(), self.output_limit);

        enum Stop {
            Exited(std::io::Result<ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let stop = tokio::select! {
            status = child.wait() => Stop::Exited(status),
            _ = tokio::time::sleep(self.timeout) => Stop::TimedOut,
            _ = cancel.cancelled() => Stop::Cancelled,
        };

        let (termination, status) = match stop {
            Stop::Exited(Ok(status)) => {
                kill_leftovers(group, &program_name);
                (Termination::Exited, Some(status))
            }
            Stop::Exited(Err(e)) => {
                terminate(&mut child, self.grace, &program_name).await;
                return Err(Error::tool(
                    &program_name,
                    format!("I/O error waiting for process: {e}"),
                ));
            }
            Stop::TimedOut => {
                tracing::warn!(
                    tool = %program_name,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "deadline exceeded, terminating"
                );
                let status = terminate(&mut child, self.grace, &program_name).await;
                (Termination::TimedOut, status)
            }
            Stop::Cancelled => {
                tracing::info!(tool = %program_name, "cancelled, terminating");
                let status = terminate(&mut child, self.grace, &program_name).await;
                (Termination::Cancelled, status)
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        Ok(ExecutionResult {
            exit_code: status.and_then(|s| s.code()),
            truncated_stdout: collect_tail(stdout).await,
            truncated_stderr: collect_tail(stderr).await,
            duration_ms,
            termination,
        })
    }
}

/// Send SIGTERM to the process group, wait up to `grace`, then SIGKILL.
///
/// Returns the exit status if the child could be reaped.
async fn terminate(child: &mut Child, grace: Duration, program: &str) -> Option<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let group = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(group, Signal::SIGTERM) {
                tracing::debug!(tool = %program, error = %e, "SIGTERM to process group failed");
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    // The leader is gone; make sure stragglers in its group are too.
                    let _ = killpg(group, Signal::SIGKILL);
                    return Some(status);
                }
                Ok(Err(e)) => {
                    tracing::debug!(tool = %program, error = %e, "wait after SIGTERM failed");
                }
                Err(_) => {
                    tracing::warn!(
                        tool = %program,
                        grace_secs = grace.as_secs_f64(),
                        "still running after grace period, sending SIGKILL"
                    );
                }
            }
            if let Err(e) = killpg(group, Signal::SIGKILL) {
                tracing::debug!(tool = %program, error = %e, "SIGKILL to process group failed");
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.start_kill() {
        tracing::debug!(tool = %program, error = %e, "kill failed; process already gone");
    }
    child.wait().await.ok()
}

/// SIGKILL whatever is left in the group after its leader exited on its own.
fn kill_leftovers(group: Option<u32>, program: &str) {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = group {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => tracing::debug!(tool = %program, "killed leftover processes in group"),
                Err(Errno::ESRCH) => {}
                Err(e) => tracing::debug!(tool = %program, error = %e, "SIGKILL to process group failed"),
            }
        }
    }

    #[cfg(not(unix))]
    let _ = (group, program);
}

fn spawn_tail_reader<R>(reader: Option<R>, limit: usize) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|reader| tokio::spawn(read_tail(reader, limit)))
}

/// Read `reader` to EOF, keeping only the last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> Vec<u8> {
    let mut kept = Vec::with_capacity(limit.min(DEFAULT_OUTPUT_LIMIT));
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&chunk[..n]);
                if kept.len() > limit {
                    let excess = kept.len() - limit;
                    kept.drain(..excess);
                }
            }
        }
    }
    kept
}

async fn collect_tail(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(READER_DRAIN, &mut handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}
