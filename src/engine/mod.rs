//! Download task lifecycle engine split into focused submodules.
//!
//! The `TaskEngine` struct and its methods are organized by domain:
//! - [`tasks`] - Caller-facing operations (create, list, update, delete, read-back)
//! - [`execution`] - Claiming and executing tasks, batch execution
//! - [`recovery`] - Resetting Failed and stale Downloading tasks
//! - [`lifecycle`] - Shutdown coordination
//! - [`services`] - Background service starters (dispatch consumer, scheduler, API)

mod execution;
mod lifecycle;
mod recovery;
mod services;
mod tasks;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use tasks::TaskFile;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;

use crate::auth::{AccountLookup, StaticTokenVerifier, TokenVerifier};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result, TaskError};
use crate::protocol::DownloaderRegistry;
use crate::storage::{self, ContentStore};
use crate::types::{Account, AccountId, DownloadTask, Event, TaskId};

/// Shutdown and in-flight execution tracking
#[derive(Clone)]
pub(crate) struct LifecycleState {
    /// Root token; background services run on child tokens of it
    pub(crate) shutdown: CancellationToken,
    /// Cleared when shutdown starts; creation and execution are refused afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Cancellation tokens of executions currently past their claim
    pub(crate) active_executions: Arc<std::sync::Mutex<HashMap<TaskId, CancellationToken>>>,
    /// Wakes the dispatch consumer as soon as a notification committed
    pub(crate) dispatch_wakeup: Arc<Notify>,
}

impl LifecycleState {
    fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
            active_executions: Arc::new(std::sync::Mutex::new(HashMap::new())),
            dispatch_wakeup: Arc::new(Notify::new()),
        }
    }
}

/// Task lifecycle engine (cloneable - all fields are Arc-wrapped)
///
/// Owns every state transition of a download task. Caller-facing operations
/// take the caller's token and enforce ownership; execution entry points are
/// internal triggers (dispatch consumer, scheduler) and take only a task id.
#[derive(Clone)]
pub struct TaskEngine {
    /// Database instance for persistence
    /// Public for integration tests to inspect task rows
    pub db: Arc<Database>,
    /// Where downloaded bytes are written and read back
    pub(crate) content_store: Arc<dyn ContentStore>,
    /// Downloader per download type, fixed at startup
    pub(crate) downloaders: Arc<DownloaderRegistry>,
    /// Caller token verification
    pub(crate) verifier: Arc<dyn TokenVerifier>,
    /// Account display data for task output
    pub(crate) accounts: Arc<dyn AccountLookup>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Shutdown coordination
    pub(crate) lifecycle: LifecycleState,
}

impl TaskEngine {
    /// Create a new TaskEngine from configuration
    ///
    /// This initializes all core components:
    /// - Opens/creates the SQLite database and runs migrations
    /// - Builds the configured content store
    /// - Registers the built-in downloaders
    /// - Loads the static tokens from `auth`
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let content_store = storage::from_config(&config.storage)?;
        let downloaders = DownloaderRegistry::with_defaults(&config.http)?;
        let verifier = Arc::new(StaticTokenVerifier::from_config(&config.auth));

        if config.auth.tokens.is_empty() {
            tracing::warn!("No auth tokens configured, every caller-facing request will be rejected");
        }
        tracing::info!(
            content_store = content_store.name(),
            ?downloaders,
            "Task engine initialized"
        );

        Ok(Self::from_parts(config, db, content_store, downloaders, verifier))
    }

    /// Assemble an engine from already-built collaborators
    ///
    /// Account lookups go to `db`; see [`TaskEngine::with_account_lookup`].
    pub fn from_parts(
        config: Config,
        db: Arc<Database>,
        content_store: Arc<dyn ContentStore>,
        downloaders: DownloaderRegistry,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let (event_tx, _rx) = broadcast::channel(config.lifecycle.event_capacity.max(1));

        Self {
            accounts: db.clone(),
            db,
            content_store,
            downloaders: Arc::new(downloaders),
            verifier,
            event_tx,
            config: Arc::new(config),
            lifecycle: LifecycleState::new(),
        }
    }

    /// Replace the account lookup used to resolve owners
    pub fn with_account_lookup(mut self, accounts: Arc<dyn AccountLookup>) -> Self {
        self.accounts = accounts;
        self
    }

    /// Subscribe to task lifecycle events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than `lifecycle.event_capacity` events
    /// receives a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Root cancellation token, cancelled by [`TaskEngine::shutdown`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.lifecycle.shutdown.clone()
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Verify `token` and resolve the caller's account
    pub(crate) async fn authenticate(&self, token: &str) -> Result<Account> {
        let verified = self.verifier.verify(token).await?;
        self.accounts
            .get_account(verified.account_id)
            .await?
            .ok_or(Error::AccountNotFound(verified.account_id))
    }
}

/// Fail with `PermissionDenied` unless `account` owns `task`
pub(crate) fn ensure_owner(task: &DownloadTask, account: AccountId) -> Result<()> {
    if task.owner_account_id != account {
        tracing::debug!(
            task_id = %task.id,
            account_id = %account,
            "caller is not the task owner"
        );
        return Err(TaskError::PermissionDenied { id: task.id }.into());
    }
    Ok(())
}
