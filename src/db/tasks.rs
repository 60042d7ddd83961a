//! Task store: download task CRUD and row locking.
//!
//! Every function takes an explicit connection so callers choose the
//! transactional scope. `&mut *tx` on a [`sqlx::Transaction`] and
//! `&mut *conn` on a pooled connection both work.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::DatabaseError;
use crate::types::{AccountId, DownloadTask, TaskId, TaskStatus};
use crate::{Error, Result};

use super::{Database, DownloadTaskRow, NewDownloadTask, TaskPatch};

const SELECT_TASK: &str = r#"
    SELECT id, of_account_id, download_type, url, status, metadata, created_at, updated_at
    FROM download_tasks
"#;

/// Insert a task as Pending with empty metadata
pub async fn create(conn: &mut SqliteConnection, task: &NewDownloadTask) -> Result<DownloadTask> {
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO download_tasks (
            of_account_id, download_type, url, status, metadata, created_at, updated_at
        ) VALUES (?, ?, ?, ?, '{}', ?, ?)
        "#,
    )
    .bind(task.owner_account_id)
    .bind(task.download_type.to_i32())
    .bind(&task.url)
    .bind(TaskStatus::Pending.to_i32())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to insert download task: {}",
            e
        )))
    })?;

    let id = TaskId(result.last_insert_rowid());
    get_by_id(conn, id).await?.ok_or_else(|| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Inserted download task {} is not readable",
            id
        )))
    })
}

/// Get a task by ID
pub async fn get_by_id(conn: &mut SqliteConnection, id: TaskId) -> Result<Option<DownloadTask>> {
    let row = sqlx::query_as::<_, DownloadTaskRow>(&format!("{SELECT_TASK} WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get download task: {}",
                e
            )))
        })?;

    row.map(DownloadTask::try_from).transpose()
}

/// Get a task by ID while holding the database write lock
///
/// SQLite has no `SELECT ... FOR UPDATE`; a no-op `UPDATE` of the row takes
/// the write lock first, so inside a transaction the returned row cannot be
/// changed by anyone else until commit or rollback. Concurrent callers block
/// on the lock (up to the busy timeout) and then read the committed state.
pub async fn get_by_id_for_update(
    conn: &mut SqliteConnection,
    id: TaskId,
) -> Result<Option<DownloadTask>> {
    sqlx::query("UPDATE download_tasks SET id = id WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to lock download task: {}",
                e
            )))
        })?;

    get_by_id(conn, id).await
}

/// List an account's tasks ordered by ID
pub async fn list_by_owner(
    conn: &mut SqliteConnection,
    owner: AccountId,
    offset: u64,
    limit: u64,
) -> Result<Vec<DownloadTask>> {
    let rows = sqlx::query_as::<_, DownloadTaskRow>(&format!(
        "{SELECT_TASK} WHERE of_account_id = ? ORDER BY id ASC LIMIT ? OFFSET ?"
    ))
    .bind(owner)
    .bind(clamp_i64(limit))
    .bind(clamp_i64(offset))
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to list download tasks: {}",
            e
        )))
    })?;

    rows.into_iter().map(DownloadTask::try_from).collect()
}

/// Count an account's tasks
pub async fn count_by_owner(conn: &mut SqliteConnection, owner: AccountId) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_tasks WHERE of_account_id = ?")
        .bind(owner)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count download tasks: {}",
                e
            )))
        })?;

    Ok(count.max(0) as u64)
}

/// Apply a partial update
///
/// Returns `false` when no row matched, either because the task does not
/// exist or because `expected_status` no longer holds.
pub async fn update_status_and_metadata(
    conn: &mut SqliteConnection,
    id: TaskId,
    patch: &TaskPatch,
) -> Result<bool> {
    let metadata = patch
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE download_tasks SET
            status = COALESCE(?, status),
            metadata = CASE WHEN ? IS NULL THEN metadata ELSE json_patch(metadata, ?) END,
            url = COALESCE(?, url),
            updated_at = ?
        WHERE id = ? AND (? IS NULL OR status = ?)
        "#,
    )
    .bind(patch.status.map(|s| s.to_i32()))
    .bind(&metadata)
    .bind(&metadata)
    .bind(&patch.url)
    .bind(Utc::now().timestamp())
    .bind(id)
    .bind(patch.expected_status.map(|s| s.to_i32()))
    .bind(patch.expected_status.map(|s| s.to_i32()))
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to update download task: {}",
            e
        )))
    })?;

    Ok(result.rows_affected() > 0)
}

/// Delete a task; returns `false` when it did not exist
pub async fn delete(conn: &mut SqliteConnection, id: TaskId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM download_tasks WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to delete download task: {}",
                e
            )))
        })?;

    Ok(result.rows_affected() > 0)
}

/// IDs of every Pending task, oldest first
pub async fn list_all_pending_ids(conn: &mut SqliteConnection) -> Result<Vec<TaskId>> {
    let ids: Vec<TaskId> =
        sqlx::query_scalar("SELECT id FROM download_tasks WHERE status = ? ORDER BY id ASC")
            .bind(TaskStatus::Pending.to_i32())
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list pending download tasks: {}",
                    e
                )))
            })?;

    Ok(ids)
}

/// Move every Failed task back to Pending; returns rows affected
pub async fn reset_all_failed_to_pending(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query("UPDATE download_tasks SET status = ?, updated_at = ? WHERE status = ?")
        .bind(TaskStatus::Pending.to_i32())
        .bind(Utc::now().timestamp())
        .bind(TaskStatus::Failed.to_i32())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset failed download tasks: {}",
                e
            )))
        })?;

    Ok(result.rows_affected())
}

/// Move tasks stuck in Downloading since before `older_than` back to Pending
pub async fn reset_stale_downloading(
    conn: &mut SqliteConnection,
    older_than: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE download_tasks SET status = ?, updated_at = ? WHERE status = ? AND updated_at < ?",
    )
    .bind(TaskStatus::Pending.to_i32())
    .bind(Utc::now().timestamp())
    .bind(TaskStatus::Downloading.to_i32())
    .bind(older_than.timestamp())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to reset stale download tasks: {}",
            e
        )))
    })?;

    Ok(result.rows_affected())
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl Database {
    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<DownloadTask>> {
        let mut conn = self.acquire().await?;
        get_by_id(&mut conn, id).await
    }

    /// IDs of every Pending task
    pub async fn list_pending_task_ids(&self) -> Result<Vec<TaskId>> {
        let mut conn = self.acquire().await?;
        list_all_pending_ids(&mut conn).await
    }

    /// Move every Failed task back to Pending
    pub async fn reset_failed_tasks(&self) -> Result<u64> {
        let mut conn = self.acquire().await?;
        reset_all_failed_to_pending(&mut conn).await
    }

    /// Move tasks stuck in Downloading back to Pending
    pub async fn reset_stale_downloading_tasks(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.acquire().await?;
        reset_stale_downloading(&mut conn, older_than).await
    }

    /// Apply a single-statement partial update
    pub async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> Result<bool> {
        let mut conn = self.acquire().await?;
        update_status_and_metadata(&mut conn, id, patch).await
    }
}
