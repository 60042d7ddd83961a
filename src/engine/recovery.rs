//! Recovery of tasks stuck outside Pending.

use std::time::Duration;

use super::TaskEngine;
use crate::error::{Error, Result};
use crate::types::Event;

impl TaskEngine {
    /// Move every Failed task back to Pending in one statement
    ///
    /// Returns the number of tasks reset. Reset tasks get no new dispatch
    /// notification; the next batch execution picks them up.
    pub async fn reset_failed_to_pending(&self) -> Result<u64> {
        let count = self.db.reset_failed_tasks().await?;
        if count == 0 {
            tracing::debug!("No failed tasks to reset");
            return Ok(0);
        }

        tracing::info!(count, "Reset failed tasks to pending");
        self.emit_event(Event::TasksRecovered { count });
        Ok(count)
    }

    /// Move tasks that have been Downloading for longer than `after` back to Pending
    ///
    /// Covers executions that died between claim and outcome (process crash,
    /// failed write of the Failed status). `after` must exceed the longest
    /// expected download, since a live execution that is reset loses its
    /// final write.
    pub async fn reset_stale_downloading(&self, after: Duration) -> Result<u64> {
        let after = chrono::Duration::from_std(after)
            .map_err(|e| Error::InvalidArgument(format!("stale threshold out of range: {}", e)))?;
        let older_than = chrono::Utc::now() - after;

        let count = self.db.reset_stale_downloading_tasks(older_than).await?;
        if count == 0 {
            tracing::debug!("No stale downloading tasks to reset");
            return Ok(0);
        }

        tracing::warn!(count, "Reset stale downloading tasks to pending");
        self.emit_event(Event::TasksRecovered { count });
        Ok(count)
    }
}
