//! Application state for the API server

use crate::{Config, TaskEngine};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; the engine itself is a bundle of Arcs.
#[derive(Clone)]
pub struct AppState {
    /// The task lifecycle engine
    pub engine: TaskEngine,

    /// Configuration (page size bounds, swagger toggle)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(engine: TaskEngine, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}
