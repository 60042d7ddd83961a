use super::*;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_create_download_task() {
    let (app, t) = create_test_app(MockDownloader::new(b"data")).await;

    let task = create_via_api(&app, ALICE_TOKEN).await;

    assert_eq!(task["download_status"], "pending");
    assert_eq!(task["download_type"], "http");
    assert_eq!(task["url"], TEST_URL);
    assert_eq!(task["metadata"], json!({}));
    assert_eq!(task["of_account"]["account_name"], "alice");
    assert_eq!(t.engine.db.count_outbox_messages().await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_with_cookie_token() {
    let (app, _t) = create_test_app(MockDownloader::new(b"data")).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/download-tasks")
        .header(header::COOKIE, format!("IDM_AUTH={ALICE_TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"download_type": "1", "url": TEST_URL}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["of_account"]["account_name"], "alice");
}

#[tokio::test]
async fn test_create_requires_token() {
    let (app, _t) = create_test_app(MockDownloader::new(b"data")).await;

    let response = app
        .oneshot(request(
            "POST",
            "/api/v1/download-tasks",
            None,
            Some(json!({"download_type": "http", "url": TEST_URL})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "unauthenticated");
}

#[tokio::test]
async fn test_create_validates_url_and_type() {
    let (app, t) = create_test_app(MockDownloader::new(b"data")).await;

    let bad_url = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/download-tasks",
            Some(ALICE_TOKEN),
            Some(json!({"download_type": "http", "url": "ftp://example.com/x"})),
        ))
        .await
        .unwrap();
    assert_eq!(bad_url.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(bad_url).await["error"]["code"], "invalid_argument");

    let bad_type = app
        .oneshot(request(
            "POST",
            "/api/v1/download-tasks",
            Some(ALICE_TOKEN),
            Some(json!({"download_type": "bittorrent", "url": TEST_URL})),
        ))
        .await
        .unwrap();
    assert_eq!(bad_type.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(
        body_json(bad_type).await["error"]["code"],
        "unsupported_download_type"
    );

    assert_eq!(t.engine.db.count_outbox_messages().await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_download_tasks_paginates() {
    let (app, _t) = create_test_app(MockDownloader::new(b"data")).await;
    for _ in 0..3 {
        create_via_api(&app, ALICE_TOKEN).await;
    }
    create_via_api(&app, BOB_TOKEN).await;

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/api/v1/download-tasks",
            Some(ALICE_TOKEN),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list = body_json(response).await;
    assert_eq!(list["total_download_task_count"], 3);
    assert_eq!(list["download_task_list"].as_array().unwrap().len(), 3);

    let response = app
        .oneshot(request(
            "GET",
            "/api/v1/download-tasks?offset=2&limit=2",
            Some(ALICE_TOKEN),
            None,
        ))
        .await
        .unwrap();
    let page = body_json(response).await;
    assert_eq!(page["total_download_task_count"], 3);
    assert_eq!(page["download_task_list"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_rejects_out_of_range_limit() {
    let (app, _t) = create_test_app(MockDownloader::new(b"data")).await;

    for uri in [
        "/api/v1/download-tasks?limit=0",
        "/api/v1/download-tasks?limit=101",
    ] {
        let response = app
            .clone()
            .oneshot(request("GET", uri, Some(ALICE_TOKEN), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn test_update_download_task() {
    let (app, _t) = create_test_app(MockDownloader::new(b"data")).await;
    let task = create_via_api(&app, ALICE_TOKEN).await;
    let uri = format!("/api/v1/download-tasks/{}", task["id"]);

    let response = app
        .clone()
        .oneshot(request(
            "PATCH",
            &uri,
            Some(ALICE_TOKEN),
            Some(json!({"metadata": {"label": "iso"}})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["metadata"], json!({"label": "iso"}));

    let forbidden = app
        .clone()
        .oneshot(request(
            "PATCH",
            &uri,
            Some(BOB_TOKEN),
            Some(json!({"metadata": {"label": "mine"}})),
        ))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let reserved = app
        .clone()
        .oneshot(request(
            "PATCH",
            &uri,
            Some(ALICE_TOKEN),
            Some(json!({"metadata": {"file-name": "1"}})),
        ))
        .await
        .unwrap();
    assert_eq!(reserved.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(body_json(reserved).await["error"]["code"], "invalid_update");

    let illegal = app
        .clone()
        .oneshot(request(
            "PATCH",
            &uri,
            Some(ALICE_TOKEN),
            Some(json!({"status": "success"})),
        ))
        .await
        .unwrap();
    assert_eq!(illegal.status(), StatusCode::PRECONDITION_FAILED);
    let body = body_json(illegal).await;
    assert_eq!(body["error"]["code"], "invalid_update");
    assert_eq!(body["error"]["details"]["current_status"], "pending");

    let missing = app
        .oneshot(request(
            "PATCH",
            "/api/v1/download-tasks/999999",
            Some(ALICE_TOKEN),
            Some(json!({"metadata": {}})),
        ))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_download_task() {
    let (app, t) = create_test_app(MockDownloader::new(b"data")).await;
    let task = create_via_api(&app, ALICE_TOKEN).await;
    let uri = format!("/api/v1/download-tasks/{}", task["id"]);

    let forbidden = app
        .clone()
        .oneshot(request("DELETE", &uri, Some(BOB_TOKEN), None))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let deleted = app
        .clone()
        .oneshot(request("DELETE", &uri, Some(ALICE_TOKEN), None))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert!(
        t.engine
            .list(ALICE_TOKEN, 0, 10)
            .await
            .unwrap()
            .download_task_list
            .is_empty()
    );

    let gone = app
        .oneshot(request("DELETE", &uri, Some(ALICE_TOKEN), None))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_download_task_file() {
    let (app, t) = create_test_app(MockDownloader::new(b"file body")).await;
    let task = create_via_api(&app, ALICE_TOKEN).await;
    let id = task["id"].as_i64().unwrap();
    let uri = format!("/api/v1/download-tasks/{id}/file");

    let early = app
        .clone()
        .oneshot(request("GET", &uri, Some(ALICE_TOKEN), None))
        .await
        .unwrap();
    assert_eq!(early.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(body_json(early).await["error"]["code"], "not_completed");

    t.engine
        .execute_task(crate::types::TaskId(id), &CancellationToken::new())
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request("GET", &uri, Some(ALICE_TOKEN), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    assert_eq!(body_bytes(response).await, b"file body");

    let stranger = app
        .oneshot(request("GET", &uri, Some(BOB_TOKEN), None))
        .await
        .unwrap();
    assert_eq!(stranger.status(), StatusCode::FORBIDDEN);
}
