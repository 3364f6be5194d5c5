//! `ProcessRunner`: launches one script attempt and waits for it to end.
//!
//! The child gets its own working directory, its own process group, piped
//! stdout/stderr and no stdin. Three things can end the wait: the process
//! exits, the deadline passes, or the cancellation token fires. Timeout and
//! cancel both kill the whole process group so grandchildren do not outlive
//! the attempt.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use scriptflow_core::{ScriptKind, ScriptRef};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{drain, StreamCapture};
use crate::types::{CapturedOutput, RunOptions, RunOutcome, RunReport};

/// How long the pipe readers may keep draining after the child is gone.
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Stateless launcher; one instance can serve any number of concurrent runs.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    drain_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Run `script` inside `working_dir` until it exits, times out, or
    /// `cancel` fires. Never returns an error: launch failures come back as
    /// [`RunOutcome::LaunchError`].
    pub async fn run(
        &self,
        script: &ScriptRef,
        working_dir: &Path,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> RunReport {
        let started_at = Utc::now();
        let origin = Instant::now();

        if cancel.is_cancelled() {
            return finished(
                RunOutcome::Cancelled,
                None,
                None,
                (CapturedOutput::default(), CapturedOutput::default()),
                started_at,
                origin,
                Some("cancelled before launch".to_string()),
            );
        }

        let mut cmd = build_command(script);
        cmd.current_dir(working_dir)
            .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(script = %script.name, error = %e, "script failed to launch");
                return finished(
                    RunOutcome::LaunchError,
                    None,
                    None,
                    (CapturedOutput::default(), CapturedOutput::default()),
                    started_at,
                    origin,
                    Some(format!("failed to launch {}: {e}", script.path.display())),
                );
            }
        };

        let pid = child.id();
        info!(script = %script.name, pid = ?pid, "script started");

        let stdout = Arc::new(Mutex::new(StreamCapture::new(
            origin,
            options.output_cap_bytes,
        )));
        let stderr = Arc::new(Mutex::new(StreamCapture::new(
            origin,
            options.output_cap_bytes,
        )));
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(drain(out, Arc::clone(&stdout))));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(drain(err, Arc::clone(&stderr))));
        }

        let (outcome, exit_code, note) = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => (RunOutcome::Completed, status.code(), None),
                Ok(status) => {
                    let note = match status.code() {
                        Some(_) => None,
                        None => Some(format!("terminated by signal ({status})")),
                    };
                    (RunOutcome::Failed, status.code(), note)
                }
                Err(e) => (RunOutcome::Failed, None, Some(format!("wait failed: {e}"))),
            },
            _ = tokio::time::sleep(options.timeout) => {
                terminate(&mut child, pid).await;
                warn!(script = %script.name, timeout_secs = options.timeout.as_secs(), "script timed out");
                (
                    RunOutcome::Timeout,
                    None,
                    Some(format!("killed after {}s timeout", options.timeout.as_secs())),
                )
            }
            _ = cancel.cancelled() => {
                terminate(&mut child, pid).await;
                info!(script = %script.name, "script cancelled");
                (RunOutcome::Cancelled, None, Some("cancelled by request".to_string()))
            }
        };

        // Readers see EOF once every holder of the pipes is gone. A detached
        // grandchild may keep them open, so cap the wait.
        for mut handle in readers {
            if tokio::time::timeout(self.drain_grace, &mut handle).await.is_err() {
                debug!(script = %script.name, "abandoning output reader after grace period");
                handle.abort();
            }
        }

        let captured = (take_capture(stdout), take_capture(stderr));
        finished(outcome, exit_code, pid, captured, started_at, origin, note)
    }
}

/// Build the launch command for a script: `interpreter [args] path` for
/// interpreted scripts, the path itself for executables.
pub fn build_command(script: &ScriptRef) -> Command {
    match &script.kind {
        ScriptKind::Interpreted { interpreter } => {
            let mut parts = interpreter.split_whitespace();
            let program = parts.next().unwrap_or(interpreter.as_str());
            let mut cmd = Command::new(program);
            cmd.args(parts).arg(&script.path);
            cmd
        }
        ScriptKind::Executable => Command::new(&script.path),
    }
}

/// SIGKILL the whole process group, then kill and reap the direct child.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(raw_pid) = pid {
        // SAFETY: killpg only sends a signal; the group was created for this
        // child via process_group(0), so its id equals the child's pid.
        unsafe {
            libc::killpg(raw_pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "child kill after group signal failed");
    }
}

fn take_capture(shared: Arc<Mutex<StreamCapture>>) -> CapturedOutput {
    match Arc::try_unwrap(shared) {
        Ok(mutex) => mutex
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(),
        // an aborted reader may still hold a reference
        Err(shared) => shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(),
    }
}

fn finished(
    outcome: RunOutcome,
    exit_code: Option<i32>,
    pid: Option<u32>,
    (stdout, stderr): (CapturedOutput, CapturedOutput),
    started_at: chrono::DateTime<Utc>,
    origin: Instant,
    note: Option<String>,
) -> RunReport {
    let elapsed = origin.elapsed();
    let finished_at = started_at
        + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
    RunReport {
        outcome,
        exit_code,
        pid,
        stdout,
        stderr,
        started_at,
        finished_at,
        elapsed,
        note,
    }
}
