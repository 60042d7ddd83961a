use super::*;
use crate::engine::test_helpers::{
    ALICE_TOKEN, BOB_TOKEN, MockDownloader, TEST_URL, TestEngine, create_test_engine,
};
use crate::error::ErrorKind;
use crate::types::{DownloadType, TaskInfo, TaskStatus};
use tokio::io::AsyncReadExt;

mod lifecycle;

/// Create a task as alice
async fn create_task(t: &TestEngine) -> TaskInfo {
    t.engine
        .create(ALICE_TOKEN, DownloadType::Http, TEST_URL)
        .await
        .unwrap()
}

/// Current status of a task straight from the database
async fn status_of(t: &TestEngine, id: TaskId) -> TaskStatus {
    t.engine.db.get_task(id).await.unwrap().unwrap().status
}

/// Read the whole stored file of a task as `token`
async fn read_file(t: &TestEngine, token: &str, id: TaskId) -> Vec<u8> {
    let mut file = t.engine.get_task_file(token, id).await.unwrap();
    let mut content = Vec::new();
    file.reader.read_to_end(&mut content).await.unwrap();
    content
}
