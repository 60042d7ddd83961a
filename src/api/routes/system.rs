//! System handlers: health, OpenAPI, events.

use crate::api::AppState;
use crate::api::auth::CallerToken;
use crate::error::Error;
use crate::types::Event;
use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}

/// GET /events - Server-sent events stream of the caller's tasks
///
/// Only events about tasks owned by the caller are delivered. The stream
/// ends when the engine shuts down.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "system",
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream"),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError)
    ),
    security(("bearer" = []), ("cookie" = []))
)]
pub async fn event_stream(
    State(state): State<AppState>,
    CallerToken(token): CallerToken,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>, Error> {
    let account = state.engine.authenticate(&token).await?;
    let owner = account.id;
    tracing::debug!(account_id = %owner, "event stream opened");

    let receiver = state.engine.subscribe();
    let stream = BroadcastStream::new(receiver);

    let sse_stream = stream.filter_map(move |result| match result {
        Ok(event) if event.owner() != Some(owner) => None,
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json_data) => Some(Ok(SseEvent::default()
                .event(event_name(&event))
                .data(json_data))),
            Err(e) => {
                tracing::warn!("Failed to serialize event to JSON: {}", e);
                None
            }
        },
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("SSE client lagged, skipped {} events", skipped);
            Some(Ok(SseEvent::default().event("error").data(format!(
                r#"{{"error":"lagged","skipped":{}}}"#,
                skipped
            ))))
        }
    });

    let shutdown = state.engine.shutdown_token().cancelled_owned();
    let sse_stream = futures::StreamExt::take_until(sse_stream, shutdown);

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

/// SSE event name for an engine event
fn event_name(event: &Event) -> &'static str {
    match event {
        Event::TaskCreated { .. } => "task_created",
        Event::TaskClaimed { .. } => "task_claimed",
        Event::TaskCompleted { .. } => "task_completed",
        Event::TaskFailed { .. } => "task_failed",
        Event::TaskUpdated { .. } => "task_updated",
        Event::TaskDeleted { .. } => "task_deleted",
        Event::TasksRecovered { .. } => "tasks_recovered",
    }
}
