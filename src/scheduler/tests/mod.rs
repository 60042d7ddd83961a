use super::*;
use crate::config::{ExecutePendingJobConfig, ResetFailedJobConfig};
use crate::engine::test_helpers::{ALICE_TOKEN, MockDownloader, TEST_URL, create_test_engine};
use crate::types::{DownloadType, TaskId, TaskStatus};

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        execute_pending: ExecutePendingJobConfig {
            enabled: true,
            interval: Duration::from_millis(50),
            concurrency_limit: 2,
        },
        reset_failed: ResetFailedJobConfig {
            enabled: true,
            interval: Duration::from_millis(50),
            stale_downloading_after: None,
        },
    }
}

async fn wait_for_status(engine: &TaskEngine, id: TaskId, status: TaskStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let task = engine.db.get_task(id).await.unwrap().unwrap();
            if task.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("task never reached expected status");
}

#[tokio::test]
async fn start_spawns_one_job_per_enabled_entry() {
    let t = create_test_engine(MockDownloader::new(b"data")).await;
    let cancel = CancellationToken::new();

    let mut config = fast_config();
    assert_eq!(
        Scheduler::new(t.engine.clone(), config.clone())
            .start(cancel.clone())
            .len(),
        2
    );

    config.reset_failed.enabled = false;
    assert_eq!(
        Scheduler::new(t.engine.clone(), config.clone())
            .start(cancel.clone())
            .len(),
        1
    );

    config.execute_pending.enabled = false;
    assert!(
        Scheduler::new(t.engine.clone(), config)
            .start(cancel.clone())
            .is_empty()
    );

    cancel.cancel();
}

#[tokio::test]
async fn jobs_stop_when_cancelled() {
    let t = create_test_engine(MockDownloader::new(b"data")).await;
    let cancel = CancellationToken::new();
    let handles = Scheduler::new(t.engine.clone(), fast_config()).start(cancel.clone());

    cancel.cancel();

    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("job did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn scheduled_jobs_recover_and_rerun_failed_task() {
    let t = create_test_engine(MockDownloader::new(b"data").failing(1, 500)).await;
    let task = t
        .engine
        .create(ALICE_TOKEN, DownloadType::Http, TEST_URL)
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let handles = Scheduler::new(t.engine.clone(), fast_config()).start(cancel.clone());

    // First batch fails it, recovery resets it, a later batch completes it
    wait_for_status(&t.engine, task.id, TaskStatus::Success).await;
    assert_eq!(t.downloader.calls(), 2);

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn reset_once_includes_stale_downloading_when_configured() {
    let t = create_test_engine(MockDownloader::new(b"data")).await;
    let task = t
        .engine
        .create(ALICE_TOKEN, DownloadType::Http, TEST_URL)
        .await
        .unwrap();
    t.engine.claim(task.id).await.unwrap();
    sqlx::query("UPDATE download_tasks SET updated_at = updated_at - 3600")
        .execute(t.engine.db.pool())
        .await
        .unwrap();

    let without_stale = Scheduler::new(t.engine.clone(), fast_config());
    assert_eq!(without_stale.run_reset_failed_once().await.unwrap(), 0);

    let mut config = fast_config();
    config.reset_failed.stale_downloading_after = Some(Duration::from_secs(60));
    let with_stale = Scheduler::new(t.engine.clone(), config);
    assert_eq!(with_stale.run_reset_failed_once().await.unwrap(), 1);

    let stored = t.engine.db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
}

#[tokio::test]
async fn execute_pending_once_reports_batch() {
    let t = create_test_engine(MockDownloader::new(b"data")).await;
    for _ in 0..3 {
        t.engine
            .create(ALICE_TOKEN, DownloadType::Http, TEST_URL)
            .await
            .unwrap();
    }

    let report = Scheduler::new(t.engine.clone(), fast_config())
        .run_execute_pending_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 3);
}
