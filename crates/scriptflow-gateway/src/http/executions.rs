//! Execution history and cancellation.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use scriptflow_core::{ExecutionId, ExecutionRecord, ExecutionState, ScheduleId, ScriptId, TriggerCause};
use scriptflow_store::ExecutionFilter;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{api_error, ApiResult};
use crate::app::AppState;

/// Lines of stdout kept in list views.
const PREVIEW_LINES: usize = 10;

/// A record without its full output, for list views.
#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    pub id: ExecutionId,
    pub script_id: ScriptId,
    pub schedule_id: Option<ScheduleId>,
    pub trigger: TriggerCause,
    pub attempt: u32,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub truncated: bool,
    pub note: Option<String>,
    pub output_preview: String,
}

impl From<ExecutionRecord> for ExecutionSummary {
    fn from(r: ExecutionRecord) -> Self {
        let output_preview = r.output_preview(PREVIEW_LINES);
        Self {
            id: r.id,
            script_id: r.script_id,
            schedule_id: r.schedule_id,
            trigger: r.trigger,
            attempt: r.attempt,
            state: r.state,
            created_at: r.created_at,
            started_at: r.started_at,
            finished_at: r.finished_at,
            duration_ms: r.duration_ms,
            exit_code: r.exit_code,
            truncated: r.truncated,
            note: r.note,
            output_preview,
        }
    }
}

/// GET /executions?script_id=&schedule_id=&state=&since=&until=&limit=
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ExecutionFilter>,
) -> ApiResult<Vec<ExecutionSummary>> {
    let records = state.store.list_executions(&filter).map_err(api_error)?;
    Ok(Json(records.into_iter().map(ExecutionSummary::from).collect()))
}

/// GET /executions/{id}: the full record, output included.
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ExecutionRecord> {
    state
        .executor
        .get(&ExecutionId::from(id))
        .map(Json)
        .map_err(api_error)
}

/// POST /executions/{id}/cancel: no-op for terminal records.
pub async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id = ExecutionId::from(id);
    let cancelled = state.executor.cancel(&id).map_err(api_error)?;
    Ok(Json(json!({ "execution_id": id, "cancelled": cancelled })))
}
