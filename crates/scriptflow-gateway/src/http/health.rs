use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe plus slot usage.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let slots = state.executor.slots();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "slots": {
            "capacity": slots.capacity(),
            "in_use": slots.in_use(),
        },
    }))
}
