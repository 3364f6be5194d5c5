//! Script catalog endpoints and manual runs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use scriptflow_core::{ScriptId, ScriptflowError};
use scriptflow_store::{NewScript, ScriptEntry};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{api_error, ApiError, ApiResult};
use crate::app::AppState;

/// GET /scripts
pub async fn list_scripts(State(state): State<Arc<AppState>>) -> ApiResult<Vec<ScriptEntry>> {
    state.store.list_scripts().map(Json).map_err(api_error)
}

/// POST /scripts: register a file already on disk.
pub async fn register_script(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewScript>,
) -> Result<(StatusCode, Json<ScriptEntry>), ApiError> {
    let entry = state.store.register_script(new).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /scripts/{id}
pub async fn get_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ScriptEntry> {
    let id = ScriptId::from(id);
    match state.store.get_script(&id).map_err(api_error)? {
        Some(entry) => Ok(Json(entry)),
        None => Err(api_error(ScriptflowError::ScriptNotFound { id: id.to_string() })),
    }
}

/// DELETE /scripts/{id}
pub async fn remove_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .remove_script(&ScriptId::from(id))
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /scripts/{id}/run: manual trigger.
///
/// Answers 202 with the new execution id, or 429 when every slot stayed busy
/// for the configured wait.
pub async fn run_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let script_id = ScriptId::from(id);
    let execution_id = state
        .executor
        .trigger_manual(&script_id)
        .await
        .map_err(api_error)?;
    info!(script_id = %script_id, execution_id = %execution_id, "manual run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": execution_id })),
    ))
}
