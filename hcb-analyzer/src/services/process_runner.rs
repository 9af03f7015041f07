//! External analysis engine runner
//!
//! Starts the engine with the artifact path as its final positional argument,
//! drains stdout and stderr concurrently until both reach end-of-stream, and
//! only then reaps the process. The whole invocation runs under a timeout
//! and a cancellation token; on either, the process is killed and reaped.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{excerpt, JobError, STDERR_EXCERPT_LIMIT};

/// Per-invocation engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    /// Executable (interpreter or engine binary)
    pub program: PathBuf,
    /// Leading arguments placed before the artifact path
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    /// Hard limit on wall-clock runtime
    pub timeout: Duration,
}

/// Raw result of a process that exited on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit status; signal-terminated processes report `128 + signal`
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Classify the exit: non-zero is `ProcessFailed`, zero with blank
    /// stdout is `EmptyOutput`. Stderr never decides the outcome.
    pub fn into_stdout(self) -> Result<Vec<u8>, JobError> {
        if !self.success() {
            return Err(JobError::ProcessFailed {
                exit_code: self.exit_code,
                stderr: excerpt(&self.stderr, STDERR_EXCERPT_LIMIT),
            });
        }

        if self.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(JobError::EmptyOutput);
        }

        Ok(self.stdout)
    }
}

enum Outcome {
    Exited(std::io::Result<(Vec<u8>, Vec<u8>, ExitStatus)>),
    TimedOut,
    Cancelled,
}

/// Stateless runner; every call carries its own [`ProcessInvocation`]
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run the engine against `artifact`.
    ///
    /// Returns the raw output for any process that exits by itself,
    /// whatever its exit code. Fails with `ProcessSpawn`, `ProcessTimeout`
    /// or `Cancelled` otherwise.
    pub async fn run(
        &self,
        invocation: &ProcessInvocation,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, JobError> {
        let program = invocation.program.display().to_string();

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .arg(artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| JobError::ProcessSpawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                terminate(&mut child).await;
                return Err(JobError::ProcessSpawn {
                    program,
                    reason: "output pipes unavailable".to_string(),
                });
            }
        };

        debug!(
            pid = ?child.id(),
            program = %program,
            artifact = %artifact.display(),
            "Analysis engine started"
        );

        let outcome = tokio::select! {
            collected = collect(&mut child, stdout, stderr) => Outcome::Exited(collected),
            _ = tokio::time::sleep(invocation.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Exited(Ok((stdout, stderr, status))) => {
                let output = ProcessOutput {
                    stdout,
                    stderr,
                    exit_code: exit_code(status),
                };

                if !output.stderr.is_empty() {
                    warn!(
                        program = %program,
                        stderr = %excerpt(&output.stderr, STDERR_EXCERPT_LIMIT),
                        "Analysis engine wrote to stderr"
                    );
                }
                info!(
                    program = %program,
                    exit_code = output.exit_code,
                    stdout_bytes = output.stdout.len(),
                    stderr_bytes = output.stderr.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Analysis engine exited"
                );

                Ok(output)
            }
            Outcome::Exited(Err(e)) => {
                terminate(&mut child).await;
                Err(JobError::ProcessSpawn {
                    program,
                    reason: format!("collecting output failed: {}", e),
                })
            }
            Outcome::TimedOut => {
                terminate(&mut child).await;
                warn!(
                    program = %program,
                    timeout_ms = invocation.timeout.as_millis() as u64,
                    "Analysis engine timed out and was killed"
                );
                Err(JobError::ProcessTimeout {
                    timeout: invocation.timeout,
                })
            }
            Outcome::Cancelled => {
                terminate(&mut child).await;
                info!(program = %program, "Analysis engine killed on cancellation");
                Err(JobError::Cancelled)
            }
        }
    }
}

/// Drain both pipes to end-of-stream, then reap
async fn collect(
    child: &mut Child,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
) -> std::io::Result<(Vec<u8>, Vec<u8>, ExitStatus)> {
    let mut out = Vec::new();
    let mut err = Vec::new();

    let (out_read, err_read) = tokio::join!(
        stdout.read_to_end(&mut out),
        stderr.read_to_end(&mut err)
    );
    out_read?;
    err_read?;

    let status = child.wait().await?;
    Ok((out, err, status))
}

/// Kill and reap; failures are logged only
async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill analysis engine");
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
