//! Shared test helpers for creating TaskEngine instances in tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::auth::StaticTokenVerifier;
use crate::config::Config;
use crate::db::Database;
use crate::engine::TaskEngine;
use crate::error::{Error, Result};
use crate::protocol::{Downloader, DownloaderRegistry};
use crate::storage::{ContentStore, ObjectContentStore};
use crate::types::{
    Account, AccountId, DownloadType, METADATA_KEY_BYTES_DOWNLOADED, METADATA_KEY_CONTENT_TYPE,
    Metadata,
};

/// Token of the first test account
pub(crate) const ALICE_TOKEN: &str = "alice-token";
/// Token of the second test account
pub(crate) const BOB_TOKEN: &str = "bob-token";
/// Valid token whose account does not exist
pub(crate) const GHOST_TOKEN: &str = "ghost-token";

/// URL accepted by the HTTP download type; the mock never fetches it
pub(crate) const TEST_URL: &str = "https://example.com/y.bin";

/// Downloader serving a fixed body, recording concurrency
pub(crate) struct MockDownloader {
    body: Vec<u8>,
    content_type: String,
    delay: Duration,
    failures_left: AtomicU32,
    failure_status: u16,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDownloader {
    pub(crate) fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            content_type: "application/octet-stream".into(),
            delay: Duration::ZERO,
            failures_left: AtomicU32::new(0),
            failure_status: 500,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every download for `delay` before writing
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `times` downloads with HTTP `status`
    pub(crate) fn failing(self, times: u32, status: u16) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        Self {
            failure_status: status,
            ..self
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(
        &self,
        url: &str,
        cancel: &CancellationToken,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<Metadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::RemoteStatus {
                status: self.failure_status,
                url: url.to_string(),
            });
        }

        sink.write_all(&self.body).await?;

        let mut metadata = Metadata::new();
        metadata.insert(
            METADATA_KEY_CONTENT_TYPE.to_string(),
            self.content_type.clone().into(),
        );
        metadata.insert(
            METADATA_KEY_BYTES_DOWNLOADED.to_string(),
            (self.body.len() as u64).into(),
        );
        Ok(metadata)
    }

    fn download_type(&self) -> DownloadType {
        DownloadType::Http
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Engine over a temp database, an in-memory content store and a mock downloader
pub(crate) struct TestEngine {
    pub(crate) engine: TaskEngine,
    pub(crate) alice: Account,
    pub(crate) bob: Account,
    pub(crate) downloader: Arc<MockDownloader>,
    pub(crate) content_store: Arc<dyn ContentStore>,
    _temp_dir: TempDir,
}

impl TestEngine {
    /// Second engine over the same database and content store with its own registry
    pub(crate) fn sibling(&self, downloaders: DownloaderRegistry) -> TaskEngine {
        TaskEngine::from_parts(
            (*self.engine.config).clone(),
            self.engine.db.clone(),
            self.content_store.clone(),
            downloaders,
            test_verifier(&self.alice, &self.bob),
        )
    }
}

fn test_verifier(alice: &Account, bob: &Account) -> Arc<StaticTokenVerifier> {
    Arc::new(
        StaticTokenVerifier::default()
            .with_token(ALICE_TOKEN, alice.id)
            .with_token(BOB_TOKEN, bob.id)
            .with_token(GHOST_TOKEN, AccountId(999)),
    )
}

/// Helper to create a test engine with two accounts, alice and bob.
/// The returned value owns the tempdir, so keep it alive for the test.
pub(crate) async fn create_test_engine(downloader: MockDownloader) -> TestEngine {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.dispatch.poll_interval = Duration::from_millis(50);
    config.lifecycle.shutdown_timeout = Duration::from_secs(5);

    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let alice = db.create_account("alice").await.unwrap();
    let bob = db.create_account("bob").await.unwrap();

    let downloader = Arc::new(downloader);
    let mut downloaders = DownloaderRegistry::new();
    downloaders.register(downloader.clone());

    let content_store: Arc<dyn ContentStore> = Arc::new(ObjectContentStore::in_memory());

    let engine = TaskEngine::from_parts(
        config,
        db,
        content_store.clone(),
        downloaders,
        test_verifier(&alice, &bob),
    );

    TestEngine {
        engine,
        alice,
        bob,
        downloader,
        content_store,
        _temp_dir: temp_dir,
    }
}
