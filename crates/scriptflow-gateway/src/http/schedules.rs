//! Schedule management. Every mutation goes through [`SchedulerHandle`] so
//! the running loop picks it up immediately.
//!
//! [`SchedulerHandle`]: scriptflow_scheduler::SchedulerHandle

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use scriptflow_core::{ScheduleDefinition, ScheduleDraft, ScheduleId, ScheduleRule};
use scriptflow_store::ScheduleStats;
use serde::Deserialize;
use std::sync::Arc;

use super::{api_error, ApiError, ApiResult};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub rule: ScheduleRule,
    #[serde(default = "default_preview_count")]
    pub count: usize,
}

fn default_preview_count() -> usize {
    5
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub active: bool,
}

/// GET /schedules
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<ScheduleDefinition>> {
    state.scheduler.list().map(Json).map_err(api_error)
}

/// POST /schedules
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<ScheduleDraft>,
) -> Result<(StatusCode, Json<ScheduleDefinition>), ApiError> {
    let def = state.scheduler.create(draft).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(def)))
}

/// GET /schedules/{id}
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ScheduleDefinition> {
    state
        .scheduler
        .get(&ScheduleId::from(id))
        .map(Json)
        .map_err(api_error)
}

/// PUT /schedules/{id}: replace the definition; `next_due` is recomputed.
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(draft): Json<ScheduleDraft>,
) -> ApiResult<ScheduleDefinition> {
    state
        .scheduler
        .update(&ScheduleId::from(id), draft)
        .map(Json)
        .map_err(api_error)
}

/// DELETE /schedules/{id}
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .scheduler
        .delete(&ScheduleId::from(id))
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /schedules/{id}/active: `{ "active": bool }`.
pub async fn set_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ActiveRequest>,
) -> ApiResult<ScheduleDefinition> {
    state
        .scheduler
        .set_active(&ScheduleId::from(id), req.active)
        .map(Json)
        .map_err(api_error)
}

/// GET /schedules/{id}/stats: executions and success rate over the last
/// 30 days.
pub async fn schedule_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ScheduleStats> {
    state
        .scheduler
        .stats(&ScheduleId::from(id))
        .map(Json)
        .map_err(api_error)
}

/// POST /schedules/preview: next run times of an unsaved rule (at most 100).
pub async fn preview_schedule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<Vec<DateTime<Utc>>> {
    state
        .scheduler
        .preview_next_runs(&req.rule, req.count)
        .map(Json)
        .map_err(api_error)
}
