//! Command execution with streamed, logged output
//!
//! Runs one external process, forwards each stdout/stderr line to the log
//! sink as it is produced, and enforces a timeout. Never returns an error:
//! spawn failures, timeouts and aborts all come back as a failed
//! [`CommandOutput`] with exit code 1.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vmprobe_common::run_result::{ABORT_MARKER, TIMEOUT_MARKER};
use vmprobe_common::LOG_TIMESTAMP_FORMAT;

use crate::log_sink::LogSink;

/// A command line rooted at a working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    /// Space-joined command line, used in logs and step descriptions
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Configuration for command execution
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Command timeout (kills process if exceeded)
    pub timeout: Duration,
    /// Time to wait for output readers to drain after the process is gone
    pub stream_flush_timeout: Duration,
    /// Kills the process early when cancelled
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    /// Create with custom timeout, default stream flush timeout, not cancellable
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            stream_flush_timeout: Duration::from_secs(2),
            cancel: None,
        }
    }

    /// Kill the process as soon as `token` is cancelled
    pub fn cancellable(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ExitOutcome {
    /// The process exited on its own
    Exited,
    /// The timeout fired and the process was killed
    TimedOut,
    /// The cancel token fired and the process was killed
    Aborted,
    /// The process could not be started at all
    SpawnFailed,
}

/// Captured result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub outcome: ExitOutcome,
}

impl CommandOutput {
    /// True only for a natural exit with code 0
    pub fn success(&self) -> bool {
        self.outcome == ExitOutcome::Exited && self.exit_code == 0
    }

    fn failed(outcome: ExitOutcome, stdout: String, stderr: impl Into<String>) -> Self {
        Self {
            stdout,
            stderr: stderr.into(),
            exit_code: 1,
            outcome,
        }
    }
}

/// Lines captured by one reader, shared so a reader abandoned mid-stream
/// still leaves what it got
type Captured = Arc<Mutex<Vec<String>>>;

/// Run a command, stream its output into `logfile`, and capture it.
pub async fn run_command(
    spec: &CommandSpec,
    options: &RunOptions,
    sink: &LogSink,
    logfile: &Path,
) -> CommandOutput {
    let timeout_secs = options.timeout.as_secs();
    let started = chrono::Local::now().format(LOG_TIMESTAMP_FORMAT);
    sink.append(
        logfile,
        &format!(
            "--- Running: {} (timeout={}s) at {} ---",
            spec.display(),
            timeout_secs,
            started
        ),
    );
    debug!(
        cmd = %spec.display(),
        cwd = %spec.cwd.display(),
        timeout_secs,
        "Running command"
    );

    let mut child = match Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let message = format!("Failed to spawn '{}': {}", spec.program, e);
            warn!(cmd = %spec.display(), error = %e, "Failed to spawn command");
            sink.append(logfile, &format!("[EXCEPTION] {message}"));
            sink.append(logfile, "--- Command finished with return code 1 ---");
            return CommandOutput::failed(ExitOutcome::SpawnFailed, String::new(), message);
        }
    };

    let stdout_lines: Captured = Arc::default();
    let stderr_lines: Captured = Arc::default();
    let stdout_handle = child.stdout.take().map(|pipe| {
        spawn_reader(pipe, "STDOUT", stdout_lines.clone(), sink.clone(), logfile)
    });
    let stderr_handle = child.stderr.take().map(|pipe| {
        spawn_reader(pipe, "STDERR", stderr_lines.clone(), sink.clone(), logfile)
    });

    let cancelled = async {
        match &options.cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    let waited = tokio::select! {
        result = tokio::time::timeout(options.timeout, child.wait()) => match result {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err((ExitOutcome::Exited, format!("Failed waiting for command: {e}"))),
            Err(_) => Err((ExitOutcome::TimedOut, TIMEOUT_MARKER.to_string())),
        },
        _ = cancelled => Err((ExitOutcome::Aborted, ABORT_MARKER.to_string())),
    };

    if let Err((outcome, _)) = &waited {
        match outcome {
            ExitOutcome::TimedOut => {
                warn!(cmd = %spec.display(), timeout_secs, "Command timed out, killing process");
                sink.append(
                    logfile,
                    &format!("[ERROR] Command timed out after {timeout_secs} seconds"),
                );
            }
            ExitOutcome::Aborted => {
                warn!(cmd = %spec.display(), "Abort requested, killing process");
                sink.append(logfile, "[ERROR] Command killed by abort");
            }
            _ => {}
        }
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill process");
        }
    }

    // Both readers must be done (or abandoned) before the result is evaluated
    for handle in [stdout_handle, stderr_handle].into_iter().flatten() {
        join_reader(handle, options.stream_flush_timeout).await;
    }

    let stdout = joined(&stdout_lines);
    let output = match waited {
        Ok(status) => CommandOutput {
            stdout,
            stderr: joined(&stderr_lines),
            exit_code: exit_code_of(status),
            outcome: ExitOutcome::Exited,
        },
        Err((outcome, marker)) => CommandOutput::failed(outcome, stdout, marker),
    };

    sink.append(
        logfile,
        &format!("--- Command finished with return code {} ---", output.exit_code),
    );
    output
}

fn spawn_reader<R>(
    pipe: R,
    label: &'static str,
    captured: Captured,
    sink: LogSink,
    logfile: &Path,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let logfile = logfile.to_path_buf();
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    sink.append(&logfile, &format!("{label}: {line}"));
                    captured
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(line.to_string());
                }
                Err(e) => {
                    debug!(label, error = %e, "Output reader stopped");
                    break;
                }
            }
        }
    })
}

/// Wait for a reader to hit EOF; a grandchild holding the pipe open must
/// not stall the controller, so give up after `flush_timeout`.
async fn join_reader(mut handle: JoinHandle<()>, flush_timeout: Duration) {
    if tokio::time::timeout(flush_timeout, &mut handle).await.is_err() {
        debug!("Output reader still open after process exit, abandoning it");
        handle.abort();
    }
}

fn joined(lines: &Captured) -> String {
    lines
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
