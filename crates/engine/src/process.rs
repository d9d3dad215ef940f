//! Cancellable subprocess execution.
//!
//! Every external tool (encoder, prober, downloader) runs through
//! [`ProcessRunner`]. The runner registers the child with the
//! [`ShutdownController`] for the lifetime of the wait, streams stdout
//! line by line to the caller, drains stderr concurrently so the child
//! never blocks on a full pipe, and on cancellation asks the child to
//! terminate before killing it once the grace period is over.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use clipstitch_common::{StitchError, StitchResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::shutdown::{terminate_pid, ShutdownController};

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Exit status plus the end of stderr.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stderr_tail: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Short failure description for error messages.
    pub fn describe_failure(&self, program: &str) -> String {
        let tail = self.stderr_tail.trim();
        if tail.is_empty() {
            format!("{program} exited with {}", self.status)
        } else {
            format!("{program} exited with {}: {tail}", self.status)
        }
    }
}

/// Spawns tools and waits on them cooperatively.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shutdown: ShutdownController,
}

impl ProcessRunner {
    pub fn new(shutdown: ShutdownController) -> Self {
        Self { shutdown }
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Run `program` with `args`, feeding each stdout line to `on_line`.
    ///
    /// Returns `Cancelled` if `cancel` fires before the child exits; the
    /// child is terminated in that case. A non-zero exit is not an error
    /// here; callers inspect [`ProcessOutput::status`].
    pub async fn run<F>(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancellationToken,
        mut on_line: F,
    ) -> StitchResult<ProcessOutput>
    where
        F: FnMut(&str) + Send,
    {
        if cancel.is_cancelled() {
            return Err(StitchError::cancelled(format!(
                "{} not started",
                program.display()
            )));
        }

        tracing::debug!(program = %program.display(), args = ?args, "Spawning process");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StitchError::FileNotFound {
                    path: program.to_path_buf(),
                },
                _ => StitchError::Io(e),
            })?;

        let _guard = child.id().map(|pid| self.shutdown.register(pid));

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StitchError::transcode("failed to capture child stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| StitchError::transcode("failed to capture child stderr"))?;
        let stderr_task = tokio::spawn(collect_tail(stderr));

        let mut lines = BufReader::new(stdout).lines();
        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => on_line(&line),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed reading child stdout");
                        break;
                    }
                }
            }
        }

        if !cancelled {
            tokio::select! {
                _ = cancel.cancelled() => cancelled = true,
                status = child.wait() => {
                    let status = status?;
                    let stderr_tail = stderr_task.await.unwrap_or_default();
                    return Ok(ProcessOutput { status, stderr_tail });
                }
            }
        }

        debug_assert!(cancelled);
        self.terminate(&mut child).await;
        stderr_task.abort();
        Err(StitchError::cancelled(format!(
            "{} interrupted",
            program.display()
        )))
    }

    /// Request termination, wait for the grace period, then kill.
    async fn terminate(&self, child: &mut Child) {
        let grace = self.shutdown.grace();
        let signalled = child.id().map(terminate_pid).unwrap_or(false);
        if signalled {
            if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                tracing::debug!(%status, "Child exited after termination request");
                return;
            }
        }
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "Failed to kill child process");
        }
    }
}

async fn collect_tail<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

/// Whether `binary` resolves on PATH (or is an existing path).
pub fn command_exists(binary: &Path) -> bool {
    which::which(binary).is_ok()
}
