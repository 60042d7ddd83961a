//! Dispatch channel between task creation and task execution
//!
//! Producers append messages to the `dispatch_outbox` table on their own
//! transaction, so a notification exists if and only if the write it
//! describes committed. A [`MessageConsumer`] leases due messages, hands
//! them to the handler registered for their topic and acknowledges or
//! reschedules them. Delivery is at-least-once: handlers must be idempotent.
//!
//! - [`MessageConsumer`] - polling consumer loop
//! - [`TaskCreatedHandler`] - executes the task named in a creation notification

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::db::outbox;
use crate::error::Result;
use crate::types::TaskId;

mod consumer;
mod handler;

pub use consumer::MessageConsumer;
pub use handler::TaskCreatedHandler;

/// Topic carrying one [`DispatchNotification`] per created task
pub const TOPIC_DOWNLOAD_TASK_CREATED: &str = "download_task_created";

/// Payload published on [`TOPIC_DOWNLOAD_TASK_CREATED`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchNotification {
    /// Task that was created
    pub download_task_id: TaskId,
}

/// Publish `payload` on `topic` within the caller's transaction
///
/// The message becomes visible to consumers when the transaction commits and
/// disappears with it on rollback.
pub async fn produce(conn: &mut SqliteConnection, topic: &str, payload: &[u8]) -> Result<i64> {
    let id = outbox::enqueue(conn, topic, payload).await?;
    tracing::debug!(topic, message_id = id, "dispatch message produced");
    Ok(id)
}

/// Trait for consuming the messages of one topic
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivery of a message
    ///
    /// Returning `Ok` acknowledges the message. A retryable error schedules a
    /// redelivery with backoff; any other error drops the message.
    async fn handle(&self, payload: &[u8]) -> Result<()>;
}
