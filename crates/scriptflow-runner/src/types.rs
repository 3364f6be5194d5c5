//! Shared data types for scriptflow-runner.

use std::time::Duration;

use chrono::{DateTime, Utc};
use scriptflow_core::config::{DEFAULT_OUTPUT_CAP_BYTES, DEFAULT_TIMEOUT_SECS};
use scriptflow_core::ExecutionState;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RunOutcome
// ---------------------------------------------------------------------------

/// How a single run ended. Every exit path maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Exit code 0.
    Completed,
    /// Non-zero exit code, or killed by a signal we did not send.
    Failed,
    /// Killed for exceeding the deadline.
    Timeout,
    /// Killed by an explicit cancel request.
    Cancelled,
    /// The process never started (missing interpreter, permissions, …).
    LaunchError,
}

impl RunOutcome {
    /// Terminal record state for this outcome.
    pub fn state(&self) -> ExecutionState {
        match self {
            RunOutcome::Completed => ExecutionState::Completed,
            RunOutcome::Failed => ExecutionState::Failed,
            RunOutcome::Timeout => ExecutionState::Timeout,
            RunOutcome::Cancelled => ExecutionState::Cancelled,
            RunOutcome::LaunchError => ExecutionState::LaunchError,
        }
    }
}

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Per-run knobs. `RunOptions::default()` gives a 5 minute timeout and a
/// 5 MiB budget per stream.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    /// Byte budget for each of stdout and stderr.
    pub output_cap_bytes: usize,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            env: Vec::new(),
        }
    }
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_cap(mut self, bytes: usize) -> Self {
        self.output_cap_bytes = bytes;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

// ---------------------------------------------------------------------------
// Captured output
// ---------------------------------------------------------------------------

/// One line of output, stamped relative to process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub offset_ms: u64,
    pub text: String,
}

/// Everything captured from one stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub lines: Vec<OutputLine>,
    /// Bytes kept (newlines included).
    pub bytes: usize,
    /// Output beyond the cap was discarded.
    pub truncated: bool,
}

impl CapturedOutput {
    /// Render as text, one `[+s.mmm] line` per captured line.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.bytes + self.lines.len() * 12);
        for line in &self.lines {
            out.push_str(&format!(
                "[+{}.{:03}s] {}\n",
                line.offset_ms / 1_000,
                line.offset_ms % 1_000,
                line.text
            ));
        }
        if self.truncated {
            out.push_str("[output truncated]\n");
        }
        out
    }

    /// The captured lines without timestamps.
    pub fn plain(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Result of [`crate::ProcessRunner::run`]. The caller persists it.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Only set when the process exited on its own.
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub started_at: DateTime<Utc>,
    /// Never earlier than `started_at`.
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Launch error message or kill reason.
    pub note: Option<String>,
}

impl RunReport {
    pub fn truncated(&self) -> bool {
        self.stdout.truncated || self.stderr.truncated
    }
}
