//! Handler for task creation notifications.

use async_trait::async_trait;

use super::{DispatchNotification, MessageHandler};
use crate::engine::TaskEngine;
use crate::error::{Error, Result, TaskError};

/// Executes the task named in a [`DispatchNotification`]
///
/// Redeliveries are harmless: a task that is no longer Pending loses the
/// claim and the message is acknowledged.
#[derive(Clone)]
pub struct TaskCreatedHandler {
    engine: TaskEngine,
}

impl TaskCreatedHandler {
    /// Handler executing tasks on `engine`
    pub fn new(engine: TaskEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for TaskCreatedHandler {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let notification: DispatchNotification = serde_json::from_slice(payload)?;
        let id = notification.download_task_id;
        let cancel = self.engine.shutdown_token().child_token();

        match self.engine.execute_task(id, &cancel).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_claim_lost() => {
                tracing::debug!(task_id = %id, "task already claimed, acknowledging notification");
                Ok(())
            }
            Err(Error::Task(TaskError::NotFound { .. })) => {
                tracing::debug!(task_id = %id, "task deleted before execution");
                Ok(())
            }
            // Recorded on the task; recovery resets it later
            Err(Error::Task(TaskError::ExecutionFailed { .. })) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
