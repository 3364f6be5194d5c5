//! Error types for the scriptflow-runner crate.

use std::path::PathBuf;

use scriptflow_core::ScriptflowError;
use thiserror::Error;

/// Errors raised while preparing or admitting an execution.
///
/// A script that fails to start is not an error here: it is reported as
/// [`crate::RunOutcome::LaunchError`].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// No slot became free within the bounded wait.
    #[error("Capacity exceeded: all {capacity} execution slots are busy")]
    CapacityExceeded { capacity: usize },

    /// The per-attempt working directory could not be prepared.
    #[error("Working directory {path}: {source}")]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<RunnerError> for ScriptflowError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::CapacityExceeded { capacity } => {
                ScriptflowError::CapacityExceeded { capacity }
            }
            RunnerError::WorkingDir { .. } => ScriptflowError::Internal(e.to_string()),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RunnerError>;
