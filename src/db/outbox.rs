//! Transactional outbox persistence for the dispatch channel.
//!
//! Messages are written on the producer's transaction and leased by
//! consumers with a visibility deadline. A leased message that is neither
//! acknowledged nor rescheduled becomes visible again once the deadline
//! passes, which is what makes delivery at-least-once.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use std::time::Duration;

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

/// A leased outbox message
#[derive(Debug, Clone, FromRow)]
pub struct OutboxMessage {
    /// Message ID
    pub id: i64,
    /// Topic the message was produced on
    pub topic: String,
    /// Opaque payload
    pub payload: Vec<u8>,
    /// Deliveries so far, including the current one
    pub attempts: i64,
}

/// Append a message on the caller's connection or transaction
pub async fn enqueue(conn: &mut SqliteConnection, topic: &str, payload: &[u8]) -> Result<i64> {
    let now = Utc::now().timestamp_millis();

    let result = sqlx::query(
        r#"
        INSERT INTO dispatch_outbox (topic, payload, attempts, available_at, created_at)
        VALUES (?, ?, 0, ?, ?)
        "#,
    )
    .bind(topic)
    .bind(payload)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to enqueue dispatch message: {}",
            e
        )))
    })?;

    Ok(result.last_insert_rowid())
}

/// Lease up to `limit` due messages in one statement
///
/// Each leased message has its attempt counter incremented and stays
/// invisible to other consumers for `visibility_timeout`.
pub async fn lease_due(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    visibility_timeout: Duration,
    limit: u32,
) -> Result<Vec<OutboxMessage>> {
    let now_ms = now.timestamp_millis();
    let invisible_until = now_ms.saturating_add(duration_millis(visibility_timeout));

    let mut messages = sqlx::query_as::<_, OutboxMessage>(
        r#"
        UPDATE dispatch_outbox
        SET attempts = attempts + 1, available_at = ?
        WHERE id IN (
            SELECT id FROM dispatch_outbox
            WHERE available_at <= ?
            ORDER BY id ASC
            LIMIT ?
        )
        RETURNING id, topic, payload, attempts
        "#,
    )
    .bind(invisible_until)
    .bind(now_ms)
    .bind(i64::from(limit))
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to lease dispatch messages: {}",
            e
        )))
    })?;

    // RETURNING order is unspecified
    messages.sort_by_key(|m| m.id);
    Ok(messages)
}

/// Remove a delivered message
pub async fn acknowledge(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM dispatch_outbox WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to acknowledge dispatch message: {}",
                e
            )))
        })?;

    Ok(())
}

/// Make a message visible again at `available_at`, recording why delivery failed
pub async fn reschedule(
    conn: &mut SqliteConnection,
    id: i64,
    available_at: DateTime<Utc>,
    error: &str,
) -> Result<()> {
    sqlx::query("UPDATE dispatch_outbox SET available_at = ?, last_error = ? WHERE id = ?")
        .bind(available_at.timestamp_millis())
        .bind(error)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reschedule dispatch message: {}",
                e
            )))
        })?;

    Ok(())
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl Database {
    /// Messages not yet acknowledged, leased or not
    pub async fn count_outbox_messages(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dispatch_outbox")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count dispatch messages: {}",
                    e
                )))
            })?;

        Ok(count.max(0) as u64)
    }
}
