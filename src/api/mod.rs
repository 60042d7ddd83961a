//! REST API server module
//!
//! Exposes the caller-facing task operations over HTTP, with an OpenAPI 3
//! description and a server-sent events stream of the caller's task events.

use crate::{Config, Result, TaskEngine};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, patch, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Path prefix of every API route
pub const API_PREFIX: &str = "/api/v1";

/// Create the API router with all route definitions
///
/// # Routes
///
/// All routes live under `/api/v1`.
///
/// ## Download Tasks
/// - `POST /download-tasks` - Create a task
/// - `GET /download-tasks` - List the caller's tasks (`offset`, `limit`)
/// - `PATCH /download-tasks/:id` - Update status, metadata or url
/// - `DELETE /download-tasks/:id` - Delete a task
/// - `GET /download-tasks/:id/file` - Stream the downloaded content
///
/// ## System
/// - `GET /events` - Server-sent events of the caller's tasks
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled, not prefixed)
///
/// Every task route and the event stream take the caller's token from the
/// `Authorization: Bearer` header or the `IDM_AUTH` cookie.
pub fn create_router(engine: TaskEngine, config: Arc<Config>) -> Router {
    let state = AppState::new(engine, config.clone());

    let api = Router::new()
        // Download Tasks
        .route(
            "/download-tasks",
            post(routes::create_download_task).get(routes::list_download_tasks),
        )
        .route(
            "/download-tasks/:id",
            patch(routes::update_download_task).delete(routes::delete_download_task),
        )
        .route(
            "/download-tasks/:id/file",
            get(routes::get_download_task_file),
        )
        // System
        .route("/events", get(routes::event_stream))
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = Router::new().nest(API_PREFIX, api);

    // Swagger UI serves its own copy of the document outside the API prefix
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Binds a TCP listener and serves the router until the engine shuts down.
/// In-flight requests are allowed to finish; event streams end with the
/// shutdown.
///
/// # Example
///
/// ```no_run
/// use idm::{Config, TaskEngine};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let engine = TaskEngine::new((*config).clone()).await?;
///
/// // Start API server (blocks until shutdown)
/// idm::api::start_api_server(engine, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(engine: TaskEngine, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;
    let shutdown = engine.shutdown_token();

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(engine, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
