//! Periodic background jobs for task execution and recovery
//!
//! This module runs the two recurring jobs of the engine, each on its own
//! interval:
//!
//! - **execute-pending**: runs every Pending task through
//!   [`TaskEngine::execute_all_pending`] with a bounded concurrency limit.
//!   It picks up tasks whose dispatch notification was lost or dropped and
//!   tasks reset by recovery.
//! - **reset-failed**: moves every Failed task back to Pending, and
//!   optionally resets tasks stuck in Downloading for too long.
//!
//! # Features
//!
//! - Independent per-job intervals, each job can be disabled
//! - A failed run is logged and never stops the job
//! - Graceful shutdown: a running batch stops starting new tasks
//!
//! # Example
//!
//! ```no_run
//! use idm::{TaskEngine, config::Config};
//! use idm::scheduler::Scheduler;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let engine = TaskEngine::new(config).await?;
//!
//! let scheduler = Scheduler::new(engine.clone(), engine.get_config().scheduler.clone());
//! let handles = scheduler.start(CancellationToken::new());
//! # drop(handles);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::engine::TaskEngine;
use crate::error::Result;
use crate::types::BatchReport;

/// Runs the engine's periodic jobs
///
/// Cloning is cheap; every job holds its own clone of the engine.
#[derive(Clone)]
pub struct Scheduler {
    engine: TaskEngine,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Creates a new scheduler for `engine`
    pub fn new(engine: TaskEngine, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Spawn one background task per enabled job
    ///
    /// Every job stops when `cancel` fires. The first run of each job happens
    /// immediately, then once per interval.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.config.execute_pending.enabled {
            let scheduler = self.clone();
            let job_cancel = cancel.clone();
            handles.push(tokio::spawn(run_every(
                "execute-pending",
                self.config.execute_pending.interval,
                cancel.clone(),
                move || {
                    let scheduler = scheduler.clone();
                    let cancel = job_cancel.clone();
                    async move { scheduler.run_execute_pending_once(&cancel).await.map(|_| ()) }
                },
            )));
        } else {
            debug!("execute-pending job disabled");
        }

        if self.config.reset_failed.enabled {
            let scheduler = self.clone();
            handles.push(tokio::spawn(run_every(
                "reset-failed",
                self.config.reset_failed.interval,
                cancel,
                move || {
                    let scheduler = scheduler.clone();
                    async move { scheduler.run_reset_failed_once().await.map(|_| ()) }
                },
            )));
        } else {
            debug!("reset-failed job disabled");
        }

        info!(jobs = handles.len(), "Scheduler started");
        handles
    }

    /// One run of the execute-pending job
    pub async fn run_execute_pending_once(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        self.engine
            .execute_all_pending(self.config.execute_pending.concurrency_limit, cancel)
            .await
    }

    /// One run of the reset-failed job
    ///
    /// Returns the total number of tasks moved back to Pending.
    pub async fn run_reset_failed_once(&self) -> Result<u64> {
        let mut count = self.engine.reset_failed_to_pending().await?;
        if let Some(after) = self.config.reset_failed.stale_downloading_after {
            count += self.engine.reset_stale_downloading(after).await?;
        }
        Ok(count)
    }
}

/// Run `job` every `period` until `cancel` fires
async fn run_every<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, job: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    info!(job = name, interval = ?period, "Scheduled job started");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        debug!(job = name, "Running scheduled job");
        if let Err(e) = job().await {
            error!(job = name, error = %e, "Scheduled job run failed");
        }
    }

    info!(job = name, "Scheduled job stopped");
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
