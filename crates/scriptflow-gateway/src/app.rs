use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use scriptflow_scheduler::{ExecutionService, SchedulerHandle};
use scriptflow_store::Store;

use crate::http;

/// Shared state, passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub store: Arc<Store>,
    pub executor: Arc<ExecutionService>,
    pub scheduler: SchedulerHandle,
}

impl AppState {
    pub fn new(executor: Arc<ExecutionService>, scheduler: SchedulerHandle) -> Self {
        Self {
            store: Arc::clone(executor.store()),
            executor,
            scheduler,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health::health_handler))
        .route(
            "/scripts",
            get(http::scripts::list_scripts).post(http::scripts::register_script),
        )
        .route(
            "/scripts/{id}",
            get(http::scripts::get_script).delete(http::scripts::remove_script),
        )
        .route("/scripts/{id}/run", post(http::scripts::run_script))
        .route("/executions", get(http::executions::list_executions))
        .route("/executions/{id}", get(http::executions::get_execution))
        .route(
            "/executions/{id}/cancel",
            post(http::executions::cancel_execution),
        )
        .route(
            "/schedules",
            get(http::schedules::list_schedules).post(http::schedules::create_schedule),
        )
        .route("/schedules/preview", post(http::schedules::preview_schedule))
        .route(
            "/schedules/{id}",
            get(http::schedules::get_schedule)
                .put(http::schedules::update_schedule)
                .delete(http::schedules::delete_schedule),
        )
        .route("/schedules/{id}/active", post(http::schedules::set_active))
        .route("/schedules/{id}/stats", get(http::schedules::schedule_stats))
        .route("/events", get(http::events::event_stream))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use scriptflow_core::config::{RunnerConfig, SchedulerConfig};
    use scriptflow_scheduler::{ExecutionSettings, SchedulerService, SystemClock};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> Router {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let executor = ExecutionService::new(store, ExecutionSettings::from_config(&RunnerConfig::default()));
        let (_service, handle) = SchedulerService::new(
            Arc::clone(&executor),
            Arc::new(SystemClock),
            &SchedulerConfig::default(),
        );
        build_router(Arc::new(AppState::new(executor, handle)))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_slots() {
        let (status, body) = call(&router(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["slots"]["capacity"], 10);
        assert_eq!(body["slots"]["in_use"], 0);
    }

    #[tokio::test]
    async fn register_then_list_and_fetch_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.py");
        std::fs::write(&path, "print('ok')\n").unwrap();
        let app = router();

        let (status, created) = call(&app, "POST", "/scripts", Some(json!({ "path": path }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "report.py");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, list) = call(&app, "GET", "/scripts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, fetched) = call(&app, "GET", &format!("/scripts/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], id.as_str());

        let (status, _) = call(&app, "DELETE", &format!("/scripts/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&app, "GET", &format!("/scripts/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "SCRIPT_NOT_FOUND");
    }

    #[tokio::test]
    async fn registering_a_missing_file_is_a_bad_request() {
        let (status, body) = call(
            &router(),
            "POST",
            "/scripts",
            Some(json!({ "path": "/definitely/not/here.sh" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn running_an_unknown_script_is_not_found() {
        let (status, body) = call(&router(), "POST", "/scripts/nope/run", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "SCRIPT_NOT_FOUND");
    }

    #[tokio::test]
    async fn invalid_rule_is_rejected_at_create_time() {
        let draft = json!({
            "script_id": "whatever",
            "name": "bad",
            "rule": { "frequency": "daily", "hour": 22, "minute": 60 }
        });
        let (status, body) = call(&router(), "POST", "/schedules", Some(draft)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_SCHEDULE");
    }

    #[tokio::test]
    async fn preview_returns_requested_count() {
        let req = json!({
            "rule": { "frequency": "weekly", "days": ["Mon", "Fri"], "hour": 9, "minute": 0,
                      "timezone": "Europe/Berlin" },
            "count": 4
        });
        let (status, body) = call(&router(), "POST", "/schedules/preview", Some(req)).await;
        assert_eq!(status, StatusCode::OK);
        let runs = body.as_array().unwrap();
        assert_eq!(runs.len(), 4);
        let instants: Vec<&str> = runs.iter().map(|v| v.as_str().unwrap()).collect();
        let mut sorted = instants.clone();
        sorted.sort();
        assert_eq!(instants, sorted);
    }

    #[tokio::test]
    async fn unknown_execution_is_not_found() {
        let app = router();
        let (status, body) = call(&app, "GET", "/executions/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "EXECUTION_NOT_FOUND");

        let (status, _) = call(&app, "POST", "/executions/nope/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, list) = call(&app, "GET", "/executions?state=running&limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(list.as_array().unwrap().is_empty());
    }
}
