//! GET /events: `executionFinished` as Server-Sent Events.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use scriptflow_core::ExecutionFinished;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::app::AppState;

pub async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.executor.subscribe();
    debug!("event stream subscriber connected");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(finished) => match Event::default()
                    .event(ExecutionFinished::NAME)
                    .json_data(&finished)
                {
                    Ok(event) => yield Ok(event),
                    Err(e) => warn!(error = %e, "failed to encode event"),
                },
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event stream subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
