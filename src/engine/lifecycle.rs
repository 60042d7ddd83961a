//! Shutdown coordination.

use std::sync::atomic::Ordering;

use super::TaskEngine;
use crate::error::Result;
use crate::types::TaskId;

impl TaskEngine {
    /// Gracefully shut down the engine
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new tasks and new executions
    /// 2. Cancels the root token (dispatch consumer, scheduler, API server)
    /// 3. Cancels every running execution
    /// 4. Waits for running executions to record their outcome, up to
    ///    `lifecycle.shutdown_timeout`
    ///
    /// Cancelled executions end as Failed and are picked up again by recovery
    /// on the next run.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new work
        self.lifecycle.accepting_new.store(false, Ordering::SeqCst);

        // 2. Stop background services
        self.lifecycle.shutdown.cancel();

        // 3. Cancel running executions
        self.cancel_active_executions();

        // 4. Wait for them to record their outcome
        let timeout = self.config.lifecycle.shutdown_timeout;
        match tokio::time::timeout(timeout, self.wait_for_active_executions()).await {
            Ok(()) => tracing::info!("All running executions finished"),
            Err(_) => tracing::warn!(
                remaining = self.active_execution_count(),
                "Timeout waiting for executions to finish, proceeding with shutdown"
            ),
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Number of executions currently past their claim
    pub fn active_execution_count(&self) -> usize {
        self.lifecycle
            .active_executions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Cancel the running execution of `id`; false when none is registered
    pub(crate) fn cancel_execution(&self, id: TaskId) -> bool {
        let active = self
            .lifecycle
            .active_executions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match active.get(&id) {
            Some(token) => {
                tracing::debug!(task_id = %id, "Cancelling running execution");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_active_executions(&self) {
        let active = self
            .lifecycle
            .active_executions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracing::debug!(active_count = active.len(), "Cancelling running executions");

        for (id, token) in active.iter() {
            tracing::debug!(task_id = %id, "Signaling cancellation");
            token.cancel();
        }
    }

    async fn wait_for_active_executions(&self) {
        loop {
            let active_count = self.active_execution_count();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for executions to finish");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
