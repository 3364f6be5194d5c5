use thiserror::Error;

/// Errors surfaced across crate boundaries and to API callers.
#[derive(Debug, Error)]
pub enum ScriptflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capacity exceeded: all {capacity} execution slots are busy")]
    CapacityExceeded { capacity: usize },

    #[error("Script not found: {id}")]
    ScriptNotFound { id: String },

    #[error("Execution not found: {id}")]
    ExecutionNotFound { id: String },

    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid transition for execution {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScriptflowError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ScriptflowError::Config(_) => "CONFIG_ERROR",
            ScriptflowError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            ScriptflowError::ScriptNotFound { .. } => "SCRIPT_NOT_FOUND",
            ScriptflowError::ExecutionNotFound { .. } => "EXECUTION_NOT_FOUND",
            ScriptflowError::ScheduleNotFound { .. } => "SCHEDULE_NOT_FOUND",
            ScriptflowError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            ScriptflowError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ScriptflowError::InvalidRequest(_) => "INVALID_REQUEST",
            ScriptflowError::Database(_) => "DATABASE_ERROR",
            ScriptflowError::Serialization(_) => "SERIALIZATION_ERROR",
            ScriptflowError::Io(_) => "IO_ERROR",
            ScriptflowError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may reasonably try the same request again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScriptflowError::CapacityExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScriptflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_capacity_is_retryable() {
        assert!(ScriptflowError::CapacityExceeded { capacity: 10 }.is_retryable());
        assert!(!ScriptflowError::ScriptNotFound { id: "x".into() }.is_retryable());
        assert!(!ScriptflowError::InvalidSchedule("empty weekday set".into()).is_retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ScriptflowError::CapacityExceeded { capacity: 1 }.code(),
            "CAPACITY_EXCEEDED"
        );
        assert_eq!(
            ScriptflowError::InvalidTransition {
                id: "e".into(),
                from: "completed".into(),
                to: "running".into()
            }
            .code(),
            "INVALID_TRANSITION"
        );
    }
}
