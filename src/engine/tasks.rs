//! Caller-facing task operations: create, list, update, delete, read-back.

use std::sync::atomic::Ordering;

use super::{TaskEngine, ensure_owner};
use crate::db::{NewDownloadTask, TaskPatch, tasks};
use crate::dispatch::{self, DispatchNotification, TOPIC_DOWNLOAD_TASK_CREATED};
use crate::error::{Error, Result, TaskError};
use crate::storage::ContentReader;
use crate::types::{
    DownloadType, ENGINE_METADATA_KEYS, Event, TaskId, TaskInfo, TaskList, TaskStatus, TaskUpdate,
};

/// Content of a completed task, ready to stream
pub struct TaskFile {
    /// Content-store name the bytes were read from
    pub file_name: String,
    /// Content type reported when the task was downloaded, if any
    pub content_type: Option<String>,
    /// Content stream
    pub reader: ContentReader,
}

impl std::fmt::Debug for TaskFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl TaskEngine {
    /// Create a download task
    ///
    /// The task is stored as Pending with empty metadata, and its dispatch
    /// notification is produced in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthenticated`] for an invalid token
    /// - [`Error::AccountNotFound`] when the token's account does not exist
    /// - [`Error::InvalidArgument`] for a URL the download type cannot fetch
    /// - [`TaskError::UnsupportedType`] when no downloader handles `download_type`
    /// - [`Error::ShuttingDown`] once shutdown started
    pub async fn create(
        &self,
        token: &str,
        download_type: DownloadType,
        url: &str,
    ) -> Result<TaskInfo> {
        if !self.lifecycle.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let account = self.authenticate(token).await?;
        if !self.downloaders.supports(download_type) {
            return Err(TaskError::UnsupportedType {
                download_type: download_type.to_string(),
            }
            .into());
        }
        let url = validate_source_url(download_type, url)?;

        let mut tx = self.db.begin().await?;
        let task = tasks::create(
            &mut tx,
            &NewDownloadTask {
                owner_account_id: account.id,
                download_type,
                url,
            },
        )
        .await?;
        let payload = serde_json::to_vec(&DispatchNotification {
            download_task_id: task.id,
        })?;
        dispatch::produce(&mut tx, TOPIC_DOWNLOAD_TASK_CREATED, &payload).await?;
        tx.commit().await?;

        self.lifecycle.dispatch_wakeup.notify_one();

        tracing::info!(
            task_id = %task.id,
            account_id = %account.id,
            download_type = %download_type,
            "Download task created"
        );
        self.emit_event(Event::TaskCreated {
            id: task.id,
            owner_account_id: account.id,
        });

        Ok(TaskInfo::new(task, account))
    }

    /// One page of the caller's tasks, ordered by id, plus their total count
    pub async fn list(&self, token: &str, offset: u64, limit: u64) -> Result<TaskList> {
        let account = self.authenticate(token).await?;

        // Page and count from one snapshot
        let mut tx = self.db.begin().await?;
        let page = tasks::list_by_owner(&mut tx, account.id, offset, limit).await?;
        let total = tasks::count_by_owner(&mut tx, account.id).await?;
        tx.commit().await?;

        Ok(TaskList {
            download_task_list: page
                .into_iter()
                .map(|task| TaskInfo::new(task, account.clone()))
                .collect(),
            total_download_task_count: total,
        })
    }

    /// Apply an owner-initiated partial update and return the updated task
    ///
    /// Metadata keys are merged into the existing document, except the keys
    /// written by execution ([`ENGINE_METADATA_KEYS`]). A status change must be
    /// an owner-permitted lifecycle edge, and the URL can only change while
    /// the task is not executing or completed. Failing a Downloading task
    /// cancels its running execution.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] / [`TaskError::PermissionDenied`]
    /// - [`TaskError::InvalidUpdate`] for a forbidden status, URL or metadata change
    pub async fn update(&self, token: &str, id: TaskId, update: TaskUpdate) -> Result<TaskInfo> {
        let account = self.authenticate(token).await?;

        let mut tx = self.db.begin().await?;
        let task = tasks::get_by_id_for_update(&mut tx, id)
            .await?
            .ok_or(TaskError::NotFound { id })?;
        ensure_owner(&task, account.id)?;

        if update.is_empty() {
            tx.commit().await?;
            return Ok(TaskInfo::new(task, account));
        }

        if let Some(metadata) = &update.metadata {
            if let Some(key) = ENGINE_METADATA_KEYS
                .iter()
                .find(|key| metadata.contains_key(**key))
            {
                return Err(TaskError::InvalidUpdate {
                    id,
                    operation: format!("set metadata key {:?}", key),
                    current: task.status,
                }
                .into());
            }
        }
        if let Some(status) = update.status {
            if status != task.status && !owner_may_transition(task.status, status) {
                return Err(TaskError::InvalidUpdate {
                    id,
                    operation: format!("change status to {}", status),
                    current: task.status,
                }
                .into());
            }
        }
        let url = match update.url {
            Some(url) if url != task.url => {
                if !matches!(task.status, TaskStatus::Pending | TaskStatus::Failed) {
                    return Err(TaskError::InvalidUpdate {
                        id,
                        operation: "change url".into(),
                        current: task.status,
                    }
                    .into());
                }
                Some(validate_source_url(task.download_type, &url)?)
            }
            _ => None,
        };

        if update.status.is_some() || update.metadata.is_some() || url.is_some() {
            let patch = TaskPatch {
                status: update.status,
                metadata: update.metadata,
                url,
                expected_status: Some(task.status),
            };
            tasks::update_status_and_metadata(&mut tx, id, &patch).await?;
        }
        let updated = tasks::get_by_id(&mut tx, id)
            .await?
            .ok_or(TaskError::NotFound { id })?;
        tx.commit().await?;

        if task.status == TaskStatus::Downloading && updated.status.is_terminal() {
            self.cancel_execution(id);
        }

        tracing::debug!(task_id = %id, status = %updated.status, "Download task updated");
        self.emit_event(Event::TaskUpdated {
            id,
            owner_account_id: account.id,
        });

        Ok(TaskInfo::new(updated, account))
    }

    /// Delete a task regardless of its status
    ///
    /// Stored content is left in place. An execution still running for the
    /// task is cancelled and finds the row gone when it records its outcome.
    pub async fn delete(&self, token: &str, id: TaskId) -> Result<()> {
        let account = self.authenticate(token).await?;

        let mut tx = self.db.begin().await?;
        let task = tasks::get_by_id_for_update(&mut tx, id)
            .await?
            .ok_or(TaskError::NotFound { id })?;
        ensure_owner(&task, account.id)?;
        tasks::delete(&mut tx, id).await?;
        tx.commit().await?;
        self.cancel_execution(id);

        tracing::info!(task_id = %id, status = %task.status, "Download task deleted");
        self.emit_event(Event::TaskDeleted {
            id,
            owner_account_id: account.id,
        });
        Ok(())
    }

    /// Open the stored content of a completed task
    ///
    /// Ownership is checked before status, so a non-owner never learns
    /// whether the task completed.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] / [`TaskError::PermissionDenied`]
    /// - [`TaskError::NotCompleted`] unless the task is Success with a recorded file name
    pub async fn get_task_file(&self, token: &str, id: TaskId) -> Result<TaskFile> {
        let account = self.authenticate(token).await?;

        let task = self
            .db
            .get_task(id)
            .await?
            .ok_or(TaskError::NotFound { id })?;
        ensure_owner(&task, account.id)?;

        let not_completed = || TaskError::NotCompleted {
            id,
            current: task.status,
        };
        if task.status != TaskStatus::Success {
            return Err(not_completed().into());
        }
        let file_name = task.file_name().ok_or_else(not_completed)?.to_string();

        let reader = self.content_store.open_read(&file_name).await?;
        Ok(TaskFile {
            content_type: task.content_type().map(str::to_string),
            file_name,
            reader,
        })
    }
}

/// Whether an owner may move a task from `from` to `to`
///
/// Downloading and Success are reached only through execution, and
/// Failed → Pending only through recovery.
pub(crate) fn owner_may_transition(from: TaskStatus, to: TaskStatus) -> bool {
    from.can_transition_to(to)
        && !matches!(to, TaskStatus::Downloading | TaskStatus::Success)
        && !(from == TaskStatus::Failed && to == TaskStatus::Pending)
}

/// Normalize `url` and check the download type can fetch it
pub(crate) fn validate_source_url(download_type: DownloadType, url: &str) -> Result<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("url must not be empty".into()));
    }
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| Error::InvalidArgument(format!("invalid url {:?}: {}", trimmed, e)))?;

    match download_type {
        DownloadType::Http => {
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(Error::InvalidArgument(format!(
                    "{} downloads need an http or https url, got {:?}",
                    download_type, trimmed
                )));
            }
        }
    }

    Ok(trimmed.to_string())
}
