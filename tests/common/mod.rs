//! Common test utilities for idm end-to-end tests
#![allow(dead_code)]

use idm::config::{Config, StaticTokenConfig, StorageConfig};
use idm::{Account, Database, Event, TaskEngine};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::Receiver;

pub const ALICE_TOKEN: &str = "alice-e2e-token";
pub const BOB_TOKEN: &str = "bob-e2e-token";

/// Accounts and config shared by every engine of one test
pub struct TestEnv {
    pub config: Config,
    pub alice: Account,
    pub bob: Account,
    _temp_dir: TempDir,
}

impl TestEnv {
    /// Temp database and local content directory with two accounts
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.persistence.database_path = temp_dir.path().join("idm.db");
        config.storage = StorageConfig::Local {
            root: temp_dir.path().join("content"),
        };
        config.dispatch.poll_interval = Duration::from_millis(50);
        config.http.retry.max_attempts = 0;
        config.http.retry.initial_delay = Duration::from_millis(10);
        config.lifecycle.shutdown_timeout = Duration::from_secs(5);

        let db = Database::new(&config.persistence.database_path)
            .await
            .unwrap();
        let alice = db.create_account("alice").await.unwrap();
        let bob = db.create_account("bob").await.unwrap();
        db.close().await;

        config.auth.tokens = vec![
            StaticTokenConfig {
                token: ALICE_TOKEN.to_string(),
                account_id: alice.id,
                expires_at: None,
            },
            StaticTokenConfig {
                token: BOB_TOKEN.to_string(),
                account_id: bob.id,
                expires_at: None,
            },
        ];

        Self {
            config,
            alice,
            bob,
            _temp_dir: temp_dir,
        }
    }

    /// A fresh engine over this environment, as a process restart would build it
    pub async fn engine(&self) -> TaskEngine {
        TaskEngine::new(self.config.clone()).await.unwrap()
    }
}

/// Wait for the next event matching `pred`, failing the test after a timeout
pub async fn wait_for_event(events: &mut Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    tokio::time::timeout(Duration::from_secs(10), async {
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
