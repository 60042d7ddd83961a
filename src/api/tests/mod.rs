use super::*;
use crate::engine::test_helpers::{
    ALICE_TOKEN, BOB_TOKEN, MockDownloader, TEST_URL, TestEngine, create_test_engine,
};
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

mod download_tasks;

/// Router over a fresh test engine
async fn create_test_app(downloader: MockDownloader) -> (Router, TestEngine) {
    let t = create_test_engine(downloader).await;
    let app = create_router(t.engine.clone(), t.engine.get_config());
    (app, t)
}

/// Build a request with an optional bearer token and JSON body
fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Create a task through the API as `token`, returning its JSON
async fn create_via_api(app: &Router, token: &str) -> Value {
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/download-tasks",
            Some(token),
            Some(json!({"download_type": "http", "url": TEST_URL})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn test_api_server_serves_and_stops_on_shutdown() {
    let t = create_test_engine(MockDownloader::new(b"data")).await;

    let mut config = (*t.engine.get_config()).clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap(); // Port 0 = OS assigns a free port
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let engine = t.engine.clone();
        async move { start_api_server(engine, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    t.engine.shutdown().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), api_handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cors_enabled() {
    let t = create_test_engine(MockDownloader::new(b"data")).await;

    let mut config = (*t.engine.get_config()).clone();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let app = create_router(t.engine.clone(), Arc::new(config));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_specific_origins() {
    let t = create_test_engine(MockDownloader::new(b"data")).await;

    let mut config = (*t.engine.get_config()).clone();
    config.api.cors_origins = vec!["http://allowed.example".to_string()];
    let app = create_router(t.engine.clone(), Arc::new(config));

    let allowed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .header("Origin", "http://allowed.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        allowed.headers().get("access-control-allow-origin").unwrap(),
        "http://allowed.example"
    );

    let denied = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .header("Origin", "http://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(
        !denied
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_swagger_ui_toggle() {
    let t = create_test_engine(MockDownloader::new(b"data")).await;

    let enabled = create_router(t.engine.clone(), t.engine.get_config());
    let response = enabled
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut config = (*t.engine.get_config()).clone();
    config.api.swagger_ui = false;
    let disabled = create_router(t.engine.clone(), Arc::new(config));
    let response = disabled
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
