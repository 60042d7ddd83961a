//! # idm
//!
//! Download task lifecycle engine: persisted download tasks owned by
//! accounts, executed exactly once per claim, with durable dispatch between
//! creation and execution.
//!
//! ## Design Philosophy
//!
//! idm is designed around a few guarantees:
//! - **Single claim** - a task moves Pending → Downloading under a row lock,
//!   so concurrent executors never download the same task twice
//! - **Durable dispatch** - the creation notification is written in the same
//!   transaction as the task (transactional outbox)
//! - **Recoverable** - failed and stale tasks return to Pending and are picked
//!   up by periodic batch execution
//! - **Event-driven** - consumers subscribe to lifecycle events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use idm::{Config, DownloadType, TaskEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = TaskEngine::new(Config::default()).await?;
//!
//!     // Execute created tasks as their notifications arrive
//!     engine.start_dispatch_consumer();
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let task = engine
//!         .create("my-token", DownloadType::Http, "https://example.com/file.iso")
//!         .await?;
//!     println!("created task {}", task.id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Caller token verification and account lookup
pub mod auth;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Transactional outbox dispatch between creation and execution
pub mod dispatch;
/// Task lifecycle engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Protocol downloaders
pub mod protocol;
/// Retry logic with exponential backoff
pub mod retry;
/// Periodic batch execution and recovery jobs
pub mod scheduler;
/// Content storage backends
pub mod storage;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use auth::{AccountLookup, StaticTokenVerifier, TokenVerifier, VerifiedToken};
pub use config::Config;
pub use db::Database;
pub use engine::{TaskEngine, TaskFile};
pub use error::{
    ApiError, DatabaseError, Error, ErrorDetail, ErrorKind, Result, StorageError, TaskError,
    ToHttpStatus,
};
pub use protocol::{Downloader, DownloaderRegistry, HttpDownloader};
pub use scheduler::Scheduler;
pub use storage::{ContentStore, LocalContentStore, ObjectContentStore};
pub use types::{
    Account, AccountId, BatchReport, DownloadTask, DownloadType, Event, Metadata, TaskId,
    TaskInfo, TaskList, TaskStatus, TaskUpdate,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use idm::{Config, TaskEngine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = TaskEngine::new(Config::default()).await?;
///     engine.start_dispatch_consumer();
///     engine.start_scheduler();
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: TaskEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await?;
    engine.db.close().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
