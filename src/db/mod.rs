//! Database layer for idm
//!
//! Handles SQLite persistence for download tasks, accounts and the dispatch outbox.
//!
//! ## Submodules
//!
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`tasks`] - Task store: CRUD and the row-locking read used by claims
//! - [`accounts`] - Account lookup used to decorate task output
//! - [`outbox`] - Transactional outbox backing the dispatch channel
//!
//! Store operations are free functions over `&mut SqliteConnection` so the
//! engine can run several of them inside one [`sqlx::Transaction`]. The
//! [`Database`] methods are single-statement conveniences over the pool.

use crate::error::{DatabaseError, Error, Result};
use crate::types::{AccountId, DownloadTask, DownloadType, Metadata, TaskId, TaskStatus};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, Sqlite, Transaction, pool::PoolConnection, sqlite::SqlitePool};

pub mod accounts;
mod migrations;
pub mod outbox;
pub mod tasks;

/// New download task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewDownloadTask {
    /// Requesting account
    pub owner_account_id: AccountId,
    /// Protocol selector
    pub download_type: DownloadType,
    /// Source resource locator
    pub url: String,
}

/// Partial update of a task row
///
/// `None` fields are left unchanged. `metadata` is applied as a JSON merge
/// patch, so keys not mentioned keep their value and `null` removes a key.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New status
    pub status: Option<TaskStatus>,
    /// Keys to merge into the metadata document
    pub metadata: Option<Metadata>,
    /// New source locator
    pub url: Option<String>,
    /// Apply only while the row still has this status
    pub expected_status: Option<TaskStatus>,
}

impl TaskPatch {
    /// Patch that only changes the status
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Restrict the patch to rows currently in `status`
    pub fn when(mut self, status: TaskStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    /// Merge `metadata` into the document
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Download task record from database
#[derive(Debug, Clone, FromRow)]
pub struct DownloadTaskRow {
    /// Unique database ID
    pub id: i64,
    /// Owning account
    pub of_account_id: i64,
    /// Protocol code (1=HTTP)
    pub download_type: i32,
    /// Source resource locator
    pub url: String,
    /// Status code (1=pending, 2=downloading, 3=failed, 4=success)
    pub status: i32,
    /// Metadata JSON object
    pub metadata: String,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl TryFrom<DownloadTaskRow> for DownloadTask {
    type Error = Error;

    fn try_from(row: DownloadTaskRow) -> Result<Self> {
        let status = TaskStatus::from_i32(row.status).ok_or_else(|| {
            DatabaseError::CorruptRow(format!("task {} has unknown status {}", row.id, row.status))
        })?;
        let download_type = DownloadType::from_i32(row.download_type).ok_or_else(|| {
            DatabaseError::CorruptRow(format!(
                "task {} has unknown download type {}",
                row.id, row.download_type
            ))
        })?;
        let metadata: Metadata = serde_json::from_str(&row.metadata).map_err(|e| {
            DatabaseError::CorruptRow(format!("task {} has invalid metadata: {}", row.id, e))
        })?;

        Ok(DownloadTask {
            id: TaskId(row.id),
            owner_account_id: AccountId(row.of_account_id),
            download_type,
            url: row.url,
            status,
            metadata,
            created_at: timestamp_to_datetime(row.created_at),
            updated_at: timestamp_to_datetime(row.updated_at),
        })
    }
}

/// Database handle for idm
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Begin a transaction on a pooled connection
    ///
    /// Pass `&mut *tx` to the store functions to compose them atomically.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })
    }

    pub(crate) async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })
    }
}

pub(crate) fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
