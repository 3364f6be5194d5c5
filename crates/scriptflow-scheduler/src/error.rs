use scriptflow_core::ScriptflowError;
use scriptflow_runner::RunnerError;
use scriptflow_store::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Script not found: {id}")]
    ScriptNotFound { id: String },

    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    #[error("Execution not found: {id}")]
    ExecutionNotFound { id: String },
}

impl From<SchedulerError> for ScriptflowError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Store(e) => e.into(),
            SchedulerError::Runner(e) => e.into(),
            SchedulerError::InvalidSchedule(msg) => ScriptflowError::InvalidSchedule(msg),
            SchedulerError::ScriptNotFound { id } => ScriptflowError::ScriptNotFound { id },
            SchedulerError::ScheduleNotFound { id } => ScriptflowError::ScheduleNotFound { id },
            SchedulerError::ExecutionNotFound { id } => ScriptflowError::ExecutionNotFound { id },
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
