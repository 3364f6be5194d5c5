//! HTTP handlers. Every error is answered with
//! `{ "error": { "code": "...", "message": "..." } }`.

use axum::{http::StatusCode, Json};
use scriptflow_core::ScriptflowError;
use serde_json::{json, Value};
use tracing::{error, warn};

pub mod events;
pub mod executions;
pub mod health;
pub mod schedules;
pub mod scripts;

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Map any crate error onto a status code and the JSON error body.
pub fn api_error(err: impl Into<ScriptflowError>) -> ApiError {
    let err = err.into();
    let status = status_for(&err);
    if status.is_server_error() {
        error!(code = err.code(), error = %err, "request failed");
    } else {
        warn!(code = err.code(), error = %err, "request rejected");
    }
    (
        status,
        Json(json!({
            "error": { "code": err.code(), "message": err.to_string() }
        })),
    )
}

pub fn status_for(err: &ScriptflowError) -> StatusCode {
    match err {
        ScriptflowError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        ScriptflowError::ScriptNotFound { .. }
        | ScriptflowError::ExecutionNotFound { .. }
        | ScriptflowError::ScheduleNotFound { .. } => StatusCode::NOT_FOUND,
        ScriptflowError::InvalidSchedule(_)
        | ScriptflowError::InvalidRequest(_)
        | ScriptflowError::Config(_) => StatusCode::BAD_REQUEST,
        ScriptflowError::InvalidTransition { .. } => StatusCode::CONFLICT,
        ScriptflowError::Database(_)
        | ScriptflowError::Serialization(_)
        | ScriptflowError::Io(_)
        | ScriptflowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
