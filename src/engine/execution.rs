//! Task execution: claim, download, complete or fail.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::TaskEngine;
use crate::db::{TaskPatch, tasks};
use crate::error::{Error, Result, TaskError};
use crate::types::{
    BatchReport, DownloadTask, Event, METADATA_KEY_ERROR, METADATA_KEY_FILE_NAME, Metadata, TaskId,
    TaskStatus,
};

/// Registration of one running execution; removed from the active map on drop
struct ActiveExecution {
    id: TaskId,
    token: CancellationToken,
    registry: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
}

impl ActiveExecution {
    fn register(
        registry: &Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
        id: TaskId,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, token.clone());
        Self {
            id,
            token,
            registry: registry.clone(),
        }
    }
}

impl Drop for ActiveExecution {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}

impl TaskEngine {
    /// Execute one task: claim it, download its resource, record the outcome
    ///
    /// This is the single execution entry point shared by the dispatch
    /// consumer and batch execution. At most one caller wins the claim for a
    /// given task; every other caller gets [`TaskError::NotPending`] without
    /// side effects.
    ///
    /// After a successful claim, any failure (unsupported type, storage,
    /// network, cancellation) moves the task to Failed with the reason in
    /// its `error` metadata and returns [`TaskError::ExecutionFailed`].
    pub async fn execute_task(&self, id: TaskId, cancel: &CancellationToken) -> Result<()> {
        if !self.lifecycle.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let task = self.claim(id).await?;
        self.emit_event(Event::TaskClaimed {
            id,
            owner_account_id: task.owner_account_id,
        });

        let execution = ActiveExecution::register(&self.lifecycle.active_executions, id, cancel);

        let outcome = match self.run_download(&task, &execution.token).await {
            Ok(metadata) => self.complete(&task, metadata).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => Ok(()),
            // The row moved on without us (deleted or recovered); nothing to record
            Err(e @ Error::Task(TaskError::NotFound { .. }))
            | Err(e @ Error::Task(TaskError::NotPending { .. })) => Err(e),
            Err(e) => self.fail(&task, e).await,
        }
    }

    /// Move a task from Pending to Downloading under the row lock
    pub(crate) async fn claim(&self, id: TaskId) -> Result<DownloadTask> {
        let mut tx = self.db.begin().await?;
        let task = tasks::get_by_id_for_update(&mut tx, id)
            .await?
            .ok_or(TaskError::NotFound { id })?;

        if task.status != TaskStatus::Pending {
            tracing::debug!(task_id = %id, status = %task.status, "claim lost, task is not pending");
            return Err(TaskError::NotPending {
                id,
                current: task.status,
            }
            .into());
        }

        tasks::update_status_and_metadata(&mut tx, id, &TaskPatch::status(TaskStatus::Downloading))
            .await?;
        tx.commit().await?;

        tracing::debug!(task_id = %id, "task claimed");
        Ok(DownloadTask {
            status: TaskStatus::Downloading,
            ..task
        })
    }

    async fn run_download(&self, task: &DownloadTask, cancel: &CancellationToken) -> Result<Metadata> {
        let downloader =
            self.downloaders
                .get(task.download_type)
                .ok_or_else(|| TaskError::UnsupportedType {
                    download_type: task.download_type.to_string(),
                })?;

        let file_name = task.id.to_string();
        tracing::info!(
            task_id = %task.id,
            downloader = downloader.name(),
            content_store = self.content_store.name(),
            "Starting download"
        );

        let mut writer = self.content_store.open_write(&file_name).await?;
        let metadata = downloader.download(&task.url, cancel, &mut writer).await?;
        writer.shutdown().await?;

        Ok(metadata)
    }

    /// Record Success with the downloader's metadata and the content key
    async fn complete(&self, task: &DownloadTask, mut metadata: Metadata) -> Result<()> {
        metadata.insert(
            METADATA_KEY_FILE_NAME.to_string(),
            task.id.to_string().into(),
        );
        let patch = TaskPatch::status(TaskStatus::Success)
            .when(TaskStatus::Downloading)
            .with_metadata(metadata);

        if !self.db.update_task(task.id, &patch).await? {
            return Err(self.lost_row(task.id).await);
        }

        tracing::info!(task_id = %task.id, "Download task completed");
        self.emit_event(Event::TaskCompleted {
            id: task.id,
            owner_account_id: task.owner_account_id,
        });
        Ok(())
    }

    /// Record Failed with the reason and convert the error for the caller
    async fn fail(&self, task: &DownloadTask, error: Error) -> Result<()> {
        let reason = error.to_string();
        tracing::warn!(task_id = %task.id, error = %reason, "Download task failed");

        let mut metadata = Metadata::new();
        metadata.insert(METADATA_KEY_ERROR.to_string(), reason.clone().into());
        let patch = TaskPatch::status(TaskStatus::Failed)
            .when(TaskStatus::Downloading)
            .with_metadata(metadata);

        match self.db.update_task(task.id, &patch).await {
            Ok(true) => {}
            Ok(false) => return Err(self.lost_row(task.id).await),
            Err(e) => {
                tracing::error!(
                    task_id = %task.id,
                    error = %e,
                    "Failed to record task failure; stale recovery will reset it"
                );
                return Err(e);
            }
        }

        self.emit_event(Event::TaskFailed {
            id: task.id,
            owner_account_id: task.owner_account_id,
            error: reason.clone(),
        });
        Err(TaskError::ExecutionFailed {
            id: task.id,
            reason,
        }
        .into())
    }

    /// Error describing why a conditional write on a claimed task matched nothing
    async fn lost_row(&self, id: TaskId) -> Error {
        match self.db.get_task(id).await {
            Ok(Some(task)) => {
                tracing::warn!(task_id = %id, status = %task.status, "task changed during execution");
                TaskError::NotPending {
                    id,
                    current: task.status,
                }
                .into()
            }
            Ok(None) => {
                tracing::info!(task_id = %id, "task deleted during execution");
                TaskError::NotFound { id }.into()
            }
            Err(e) => e,
        }
    }

    /// Execute every Pending task with at most `concurrency_limit` in flight
    ///
    /// Returns once every started execution finished. Per-task failures are
    /// logged and counted, never propagated; only the initial scan can fail.
    /// When `cancel` fires, tasks not yet started are skipped.
    pub async fn execute_all_pending(
        &self,
        concurrency_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let ids = self.db.list_pending_task_ids().await?;
        let mut report = BatchReport {
            total: ids.len(),
            ..BatchReport::default()
        };
        if ids.is_empty() {
            tracing::debug!("No pending tasks to execute");
            return Ok(report);
        }

        tracing::info!(
            pending = ids.len(),
            concurrency_limit,
            "Executing pending tasks"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));
        let mut running = JoinSet::new();
        let mut started = 0usize;

        for id in ids {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let engine = self.clone();
            let cancel = cancel.clone();
            running.spawn(async move {
                let _permit = permit;
                (id, engine.execute_task(id, &cancel).await)
            });
            started += 1;
        }
        report.skipped += report.total - started;

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.succeeded += 1,
                Ok((id, Err(e))) if e.is_claim_lost() => {
                    tracing::debug!(task_id = %id, "task claimed by another executor");
                    report.skipped += 1;
                }
                Ok((id, Err(e))) => {
                    tracing::warn!(task_id = %id, error = %e, "pending task execution failed");
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "pending task execution panicked");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "Pending task batch finished"
        );
        Ok(report)
    }
}
