//! Background service starters: dispatch consumer, scheduler, API server.

use std::sync::Arc;

use super::TaskEngine;
use crate::dispatch::{MessageConsumer, TOPIC_DOWNLOAD_TASK_CREATED, TaskCreatedHandler};
use crate::error::Result;
use crate::scheduler::Scheduler;

impl TaskEngine {
    /// Start the dispatch consumer executing created tasks
    ///
    /// The consumer stops when the engine shuts down.
    pub fn start_dispatch_consumer(&self) -> tokio::task::JoinHandle<()> {
        let mut consumer = MessageConsumer::new(
            self.db.clone(),
            self.config.dispatch.clone(),
            self.lifecycle.dispatch_wakeup.clone(),
        );
        consumer.register_handler(
            TOPIC_DOWNLOAD_TASK_CREATED,
            Arc::new(TaskCreatedHandler::new(self.clone())),
        );

        let handle = consumer.start(self.lifecycle.shutdown.child_token());
        tracing::info!("Dispatch consumer background task started");
        handle
    }

    /// Start the periodic batch-execution and recovery jobs
    ///
    /// Returns one handle per enabled job. Jobs stop when the engine shuts down.
    pub fn start_scheduler(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let scheduler = Scheduler::new(self.clone(), self.config.scheduler.clone());
        scheduler.start(self.lifecycle.shutdown.child_token())
    }

    /// Spawn the REST API server in a background task
    ///
    /// The server listens on `api.bind_address` and stops accepting
    /// connections when the engine shuts down.
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let engine = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(engine, config).await })
    }
}
