use super::*;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

/// Wait for the next event matching `pred`, failing the test after a timeout
async fn wait_for_event(events: &mut Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn dispatch_consumer_executes_created_task() {
    let t = create_test_engine(MockDownloader::new(b"dispatched")).await;
    let consumer = t.engine.start_dispatch_consumer();
    let mut events = t.engine.subscribe();

    let task = create_task(&t).await;

    wait_for_event(&mut events, |e| {
        matches!(e, Event::TaskCompleted { id, .. } if *id == task.id)
    })
    .await;
    assert_eq!(read_file(&t, ALICE_TOKEN, task.id).await, b"dispatched");

    // The acknowledgement follows the handler's return
    let mut remaining = t.engine.db.count_outbox_messages().await.unwrap();
    for _ in 0..50 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        remaining = t.engine.db.count_outbox_messages().await.unwrap();
    }
    assert_eq!(remaining, 0);

    t.engine.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn events_follow_the_task_lifecycle_in_order() {
    let t = create_test_engine(MockDownloader::new(b"payload")).await;
    let mut events = t.engine.subscribe();

    let task = create_task(&t).await;
    t.engine
        .execute_task(task.id, &CancellationToken::new())
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(events.recv().await.unwrap());
    }
    assert!(matches!(seen[0], Event::TaskCreated { .. }));
    assert!(matches!(seen[1], Event::TaskClaimed { .. }));
    assert!(matches!(seen[2], Event::TaskCompleted { .. }));
    assert!(seen.iter().all(|e| e.owner() == Some(t.alice.id)));
}

#[tokio::test]
async fn shutdown_cancels_running_execution() {
    let t = create_test_engine(MockDownloader::new(b"payload").with_delay(Duration::from_secs(30)))
        .await;
    let task = create_task(&t).await;

    let engine = t.engine.clone();
    let running = tokio::spawn(async move {
        engine
            .execute_task(task.id, &CancellationToken::new())
            .await
    });
    while t.engine.active_execution_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    t.engine.shutdown().await.unwrap();

    assert_eq!(t.engine.active_execution_count(), 0);
    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::Task(TaskError::ExecutionFailed { .. })
    ));
    assert_eq!(status_of(&t, task.id).await, TaskStatus::Failed);
}

#[tokio::test]
async fn shutdown_refuses_new_work() {
    let t = create_test_engine(MockDownloader::new(b"payload")).await;
    let task = create_task(&t).await;

    t.engine.shutdown().await.unwrap();

    let err = t
        .engine
        .create(ALICE_TOKEN, DownloadType::Http, TEST_URL)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    assert_eq!(err.kind(), ErrorKind::Unavailable);

    let err = t
        .engine
        .execute_task(task.id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    assert_eq!(status_of(&t, task.id).await, TaskStatus::Pending);

    // Reads keep working while the process drains
    tokio_test::assert_ok!(t.engine.list(ALICE_TOKEN, 0, 10).await);
}
