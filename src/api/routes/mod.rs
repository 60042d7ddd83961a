//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`download_tasks`] - Caller-facing task operations
//! - [`system`] - Health, events, OpenAPI

use serde::{Deserialize, Serialize};

mod download_tasks;
mod system;

pub use download_tasks::*;
pub use system::*;

/// Page size used when `limit` is omitted
pub const DEFAULT_PAGE_SIZE: u64 = 10;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Query parameters for GET /download-tasks
#[derive(Debug, Default, Deserialize, Serialize, utoipa::IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ListDownloadTasksQuery {
    /// Number of tasks to skip (default: 0)
    pub offset: Option<u64>,
    /// Maximum number of tasks to return (default: 10, at most `api.max_page_size`)
    pub limit: Option<u64>,
}

/// Request body for POST /download-tasks
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CreateDownloadTaskRequest {
    /// Protocol selector, by name ("http") or code ("1")
    pub download_type: String,
    /// Source resource locator
    pub url: String,
}
