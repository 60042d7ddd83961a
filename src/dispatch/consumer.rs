//! Outbox consumer loop.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::MessageHandler;
use crate::config::DispatchConfig;
use crate::db::{Database, outbox};
use crate::db::outbox::OutboxMessage;
use crate::error::{Error, Result};
use crate::retry::{IsRetryable, backoff_delay};

/// Delivers outbox messages to registered topic handlers
///
/// The consumer wakes up every `poll_interval`, or earlier when `wakeup` is
/// notified by an in-process producer. Messages of one lease batch are
/// handled concurrently.
pub struct MessageConsumer {
    db: Arc<Database>,
    config: DispatchConfig,
    wakeup: Arc<Notify>,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

/// What happened to one delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Acknowledged,
    Rescheduled,
    Dropped,
    Abandoned,
}

impl MessageConsumer {
    /// Create a consumer with no handlers
    pub fn new(db: Arc<Database>, config: DispatchConfig, wakeup: Arc<Notify>) -> Self {
        Self {
            db,
            config,
            wakeup,
            handlers: HashMap::new(),
        }
    }

    /// Route messages of `topic` to `handler`, replacing any previous handler
    pub fn register_handler(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> &mut Self {
        self.handlers.insert(topic.into(), handler);
        self
    }

    /// Spawn the consumer loop; it exits when `cancel` fires
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        let topics: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tracing::info!(?topics, "dispatch consumer started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.poll_once().await {
                // A full batch means more messages are probably due
                Ok(delivered) if delivered >= self.config.batch_size as usize => continue,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "failed to poll dispatch outbox");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("dispatch consumer stopped");
    }

    /// Lease one batch of due messages and deliver them
    ///
    /// Returns the number of messages leased.
    pub async fn poll_once(&self) -> Result<usize> {
        let messages = {
            let mut conn = self.db.acquire().await?;
            outbox::lease_due(
                &mut conn,
                Utc::now(),
                self.config.visibility_timeout,
                self.config.batch_size,
            )
            .await?
        };

        let count = messages.len();
        if count > 0 {
            tracing::debug!(count, "leased dispatch messages");
        }

        futures::future::join_all(messages.into_iter().map(|message| self.deliver(message))).await;
        Ok(count)
    }

    pub(crate) async fn deliver(&self, message: OutboxMessage) -> Delivery {
        let result = match self.handlers.get(&message.topic) {
            Some(handler) => handler.handle(&message.payload).await,
            None => Err(Error::Other(format!(
                "no handler registered for topic {}",
                message.topic
            ))),
        };

        let delivery = match result {
            Ok(()) => self.acknowledge(&message).await,
            // Left leased: the visibility timeout hands it to the next process
            Err(Error::ShuttingDown) => {
                tracing::debug!(
                    message_id = message.id,
                    topic = %message.topic,
                    "shutdown in progress, leaving message for redelivery"
                );
                Ok(Delivery::Abandoned)
            }
            Err(e) if e.is_retryable() && self.may_retry(&message) => {
                self.reschedule(&message, &e).await
            }
            Err(e) => {
                tracing::error!(
                    message_id = message.id,
                    topic = %message.topic,
                    attempts = message.attempts,
                    error = %e,
                    "dropping undeliverable dispatch message"
                );
                self.acknowledge(&message).await.map(|_| Delivery::Dropped)
            }
        };

        delivery.unwrap_or_else(|e| {
            // Bookkeeping failed; the lease expires and the message is redelivered
            tracing::error!(
                message_id = message.id,
                error = %e,
                "failed to record dispatch outcome"
            );
            Delivery::Abandoned
        })
    }

    fn may_retry(&self, message: &OutboxMessage) -> bool {
        message.attempts <= i64::from(self.config.retry.max_attempts)
    }

    async fn acknowledge(&self, message: &OutboxMessage) -> Result<Delivery> {
        let mut conn = self.db.acquire().await?;
        outbox::acknowledge(&mut conn, message.id).await?;
        Ok(Delivery::Acknowledged)
    }

    async fn reschedule(&self, message: &OutboxMessage, error: &Error) -> Result<Delivery> {
        let attempt = u32::try_from(message.attempts).unwrap_or(u32::MAX);
        let delay = backoff_delay(&self.config.retry, attempt);
        let available_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));

        tracing::warn!(
            message_id = message.id,
            topic = %message.topic,
            attempts = message.attempts,
            delay_ms = delay.as_millis(),
            error = %error,
            "dispatch delivery failed, rescheduling"
        );

        let mut conn = self.db.acquire().await?;
        outbox::reschedule(&mut conn, message.id, available_at, &error.to_string()).await?;
        Ok(Delivery::Rescheduled)
    }
}
