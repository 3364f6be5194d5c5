use scriptflow_core::{ExecutionState, ScriptflowError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Script not found: {id}")]
    ScriptNotFound { id: String },

    #[error("Execution not found: {id}")]
    ExecutionNotFound { id: String },

    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    /// The requested state change is not an edge of the execution state
    /// machine. Signals an integrity bug in the caller.
    #[error("Invalid transition for execution {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ExecutionState,
        to: ExecutionState,
    },

    /// A scheduled record for this script is already pending or running.
    #[error("Scheduled execution already in flight for script {script_id}")]
    ScheduledInFlight { script_id: String },

    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<StoreError> for ScriptflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ScriptNotFound { id } => ScriptflowError::ScriptNotFound { id },
            StoreError::ExecutionNotFound { id } => ScriptflowError::ExecutionNotFound { id },
            StoreError::ScheduleNotFound { id } => ScriptflowError::ScheduleNotFound { id },
            StoreError::InvalidTransition { id, from, to } => {
                ScriptflowError::InvalidTransition {
                    id,
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
            StoreError::InvalidScript(msg) => ScriptflowError::InvalidRequest(msg),
            StoreError::Serialization(e) => ScriptflowError::Serialization(e),
            StoreError::Io(e) => ScriptflowError::Io(e),
            other => ScriptflowError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
