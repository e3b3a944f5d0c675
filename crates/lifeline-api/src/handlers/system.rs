//! Health check and lifecycle event stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use tokio_stream::{wrappers::BroadcastStream, StreamExt as _};

use lifeline_core::EventEnvelope;

use crate::auth::RequireAdmin;
use crate::AppState;

/// GET /health
#[utoipa::path(get, path = "/health", tag = "System",
    responses((status = 200, description = "Service is up")))]
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Server-sent stream of lifecycle events for administrators.
///
/// GET /api/v1/events
#[utoipa::path(get, path = "/api/v1/events", tag = "System",
    responses(
        (status = 200, description = "text/event-stream of lifecycle envelopes"),
        (status = 403, description = "Administrator role required")))]
pub async fn event_stream(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_bus.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result: Result<EventEnvelope, _>| {
        match result {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(json) => Some(Ok(Event::default()
                    .event(envelope.event_type)
                    .id(envelope.event_id.to_string())
                    .data(json))),
                Err(_) => None,
            },
            // Lagged receivers skip ahead
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
