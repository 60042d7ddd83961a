//! End-to-end task lifecycle over a real HTTP source
//!
//! These tests run the whole stack: REST API, transactional dispatch,
//! the HTTP downloader against a wiremock server, the local content store
//! and recovery.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{ALICE_TOKEN, BOB_TOKEN, TestEnv, wait_for_event};
use idm::{DownloadType, Event, TaskId, TaskStatus};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn authed(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn read_body(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn created_task_is_downloaded_and_served_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/y.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-test")
                .set_body_bytes(b"release payload".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnv::new().await;
    let engine = env.engine().await;
    engine.start_dispatch_consumer();
    let mut events = engine.subscribe();
    let app = idm::api::create_router(engine.clone(), engine.get_config());

    let response = app
        .clone()
        .oneshot(authed(
            "POST",
            "/api/v1/download-tasks",
            ALICE_TOKEN,
            Some(json!({
                "download_type": "http",
                "url": format!("{}/releases/y.bin", server.uri()),
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let task: Value = serde_json::from_slice(&read_body(response).await).unwrap();
    let id = task["id"].as_i64().unwrap();
    assert_eq!(task["download_status"], "pending");

    wait_for_event(&mut events, |e| {
        matches!(e, Event::TaskCompleted { id: done, .. } if *done == TaskId(id))
    })
    .await;

    // Listing shows the stored metadata
    let response = app
        .clone()
        .oneshot(authed("GET", "/api/v1/download-tasks", ALICE_TOKEN, None))
        .await
        .unwrap();
    let list: Value = serde_json::from_slice(&read_body(response).await).unwrap();
    let listed = &list["download_task_list"][0];
    assert_eq!(listed["download_status"], "success");
    assert_eq!(listed["metadata"]["file-name"], id.to_string());
    assert_eq!(listed["metadata"]["Content-Type"], "application/x-test");

    // Owner reads the bytes back
    let response = app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/api/v1/download-tasks/{id}/file"),
            ALICE_TOKEN,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/x-test"
    );
    assert_eq!(read_body(response).await, b"release payload");

    // Nobody else does
    let response = app
        .oneshot(authed(
            "GET",
            &format!("/api/v1/download-tasks/{id}/file"),
            BOB_TOKEN,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_download_is_recovered_on_next_batch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"finally".to_vec()))
        .mount(&server)
        .await;

    let env = TestEnv::new().await;
    let engine = env.engine().await;
    let task = engine
        .create(
            ALICE_TOKEN,
            DownloadType::Http,
            &format!("{}/flaky.bin", server.uri()),
        )
        .await
        .unwrap();

    let err = engine
        .execute_task(task.id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        idm::Error::Task(idm::TaskError::ExecutionFailed { .. })
    ));
    let failed = engine.db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(
        failed.metadata["error"]
            .as_str()
            .unwrap()
            .contains("HTTP 500")
    );

    assert_eq!(engine.reset_failed_to_pending().await.unwrap(), 1);
    let report = engine
        .execute_all_pending(4, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let mut reader = engine
        .get_task_file(ALICE_TOKEN, task.id)
        .await
        .unwrap()
        .reader;
    let mut content = Vec::new();
    reader.read_to_end(&mut content).await.unwrap();
    assert_eq!(content, b"finally");

    let done = engine.db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Success);
    assert_eq!(done.metadata["file-name"], task.id.to_string());
}

#[tokio::test]
async fn notification_survives_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/later.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"after restart".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnv::new().await;

    // First process creates the task but never runs a consumer
    let first = env.engine().await;
    let task = first
        .create(
            ALICE_TOKEN,
            DownloadType::Http,
            &format!("{}/later.bin", server.uri()),
        )
        .await
        .unwrap();
    first.shutdown().await.unwrap();
    first.db.close().await;

    // Second process delivers the pending notification
    let second = env.engine().await;
    assert_eq!(second.db.count_outbox_messages().await.unwrap(), 1);
    let mut events = second.subscribe();
    second.start_dispatch_consumer();

    wait_for_event(&mut events, |e| {
        matches!(e, Event::TaskCompleted { id, .. } if *id == task.id)
    })
    .await;

    let stored = second.db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Success);
    assert_eq!(stored.owner_account_id, env.alice.id);

    second.shutdown().await.unwrap();
}
