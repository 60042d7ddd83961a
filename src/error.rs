//! Error types for idm
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Task, Database, Storage)
//! - A coarse [`ErrorKind`] classification shared by the engine and the transport layer
//! - HTTP status code mapping and structured error responses

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::{TaskId, TaskStatus};

/// Result type alias for idm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for idm
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "storage.root")
        key: Option<String>,
    },

    /// Request rejected before reaching the engine (malformed field, bad bounds)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Token missing, unknown or expired
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Account referenced by a verified token does not exist
    #[error("account {0} not found")]
    AccountNotFound(crate::types::AccountId),

    /// Task lifecycle error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Content store error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error (HTTP client)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote server answered with a non-success status
    #[error("remote server returned HTTP {status} for {url}")]
    RemoteStatus {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation cancelled through its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Engine is shutting down and not accepting new work
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Generic error for cases not covered by specific variants
    #[error("{0}")]
    Other(String),
}

/// Task lifecycle errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task not found
    #[error("download task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: TaskId,
    },

    /// Caller is not the owner of the task
    #[error("account is not the owner of download task {id}")]
    PermissionDenied {
        /// The task ID
        id: TaskId,
    },

    /// Claim lost: the task was not Pending when this executor locked it
    #[error("download task {id} is not pending (current status: {current})")]
    NotPending {
        /// The task ID
        id: TaskId,
        /// Status observed under the lock
        current: TaskStatus,
    },

    /// Read-back requested before the task completed
    #[error("download task {id} is not completed (current status: {current})")]
    NotCompleted {
        /// The task ID
        id: TaskId,
        /// Status at the time of the request
        current: TaskStatus,
    },

    /// No downloader is registered for the download type
    #[error("unsupported download type: {download_type}")]
    UnsupportedType {
        /// Type name or raw code
        download_type: String,
    },

    /// Owner-initiated edit rejected by the lifecycle rules
    #[error("cannot {operation} download task {id} in status {current}")]
    InvalidUpdate {
        /// The task ID
        id: TaskId,
        /// Operation that was attempted
        operation: String,
        /// Status at the time of the request
        current: TaskStatus,
    },

    /// Execution failed after a successful claim; the task was marked Failed
    #[error("download task {id} failed: {reason}")]
    ExecutionFailed {
        /// The task ID
        id: TaskId,
        /// Failure reason recorded in the task metadata
        reason: String,
    },
}

/// Database-specific errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run database migration
    #[error("failed to run migration: {0}")]
    MigrationFailed(String),

    /// Query execution failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Persisted row could not be decoded into a domain type
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Content store errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Content name rejected by the backend
    #[error("invalid content name: {0:?}")]
    InvalidName(String),

    /// No content stored under the name
    #[error("content not found: {0}")]
    NotFound(String),

    /// Object storage backend error
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Coarse classification of errors shared by every caller-facing surface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request
    InvalidArgument,
    /// Task or account absent
    NotFound,
    /// Caller is not the owner
    PermissionDenied,
    /// Token invalid or expired
    Unauthenticated,
    /// Operation not allowed in the current state
    FailedPrecondition,
    /// Not accepting work right now
    Unavailable,
    /// Storage, database or network failure; details are never surfaced
    Internal,
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Error::AccountNotFound(_) => ErrorKind::NotFound,
            Error::Task(TaskError::NotFound { .. }) => ErrorKind::NotFound,
            Error::Task(TaskError::PermissionDenied { .. }) => ErrorKind::PermissionDenied,
            Error::Task(TaskError::NotPending { .. })
            | Error::Task(TaskError::NotCompleted { .. })
            | Error::Task(TaskError::UnsupportedType { .. })
            | Error::Task(TaskError::InvalidUpdate { .. }) => ErrorKind::FailedPrecondition,
            Error::ShuttingDown => ErrorKind::Unavailable,
            Error::Task(TaskError::ExecutionFailed { .. })
            | Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Storage(_)
            | Error::Io(_)
            | Error::Network(_)
            | Error::RemoteStatus { .. }
            | Error::Serialization(_)
            | Error::Cancelled
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// True when this executor lost the claim race, a normal outcome under concurrency
    pub fn is_claim_lost(&self) -> bool {
        matches!(self, Error::Task(TaskError::NotPending { .. }))
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "download task 123 not found",
///     "details": {
///       "download_task_id": 123
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "permission_denied")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    /// Create an "unauthenticated" error
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new("unauthenticated", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidArgument => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::FailedPrecondition => 412,
            ErrorKind::Unavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Unauthenticated(_) => "unauthenticated",
            Error::AccountNotFound(_) => "account_not_found",
            Error::Task(TaskError::NotFound { .. }) => "not_found",
            Error::Task(TaskError::PermissionDenied { .. }) => "permission_denied",
            Error::Task(TaskError::NotPending { .. }) => "not_pending",
            Error::Task(TaskError::NotCompleted { .. }) => "not_completed",
            Error::Task(TaskError::UnsupportedType { .. }) => "unsupported_download_type",
            Error::Task(TaskError::InvalidUpdate { .. }) => "invalid_update",
            Error::ShuttingDown => "shutting_down",
            _ => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();

        // Internal failures are logged by the caller; only an opaque message leaves the process
        if error.kind() == ErrorKind::Internal {
            return ApiError::internal("internal error");
        }

        let message = error.to_string();
        let details = match &error {
            Error::Task(TaskError::NotFound { id })
            | Error::Task(TaskError::PermissionDenied { id }) => Some(serde_json::json!({
                "download_task_id": id,
            })),
            Error::Task(TaskError::NotPending { id, current })
            | Error::Task(TaskError::NotCompleted { id, current }) => Some(serde_json::json!({
                "download_task_id": id,
                "current_status": current,
            })),
            Error::Task(TaskError::InvalidUpdate {
                id,
                operation,
                current,
            }) => Some(serde_json::json!({
                "download_task_id": id,
                "operation": operation,
                "current_status": current,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
