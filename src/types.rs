//! Core types for idm

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Free-form metadata document attached to every task
///
/// Keys written by the engine itself are listed as `METADATA_KEY_*` constants.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding the content-store name of a completed task
pub const METADATA_KEY_FILE_NAME: &str = "file-name";

/// Metadata key holding the content type reported by the remote server
pub const METADATA_KEY_CONTENT_TYPE: &str = "Content-Type";

/// Metadata key holding the number of bytes written to the content store
pub const METADATA_KEY_BYTES_DOWNLOADED: &str = "bytes-downloaded";

/// Metadata key holding the reason of the last failed execution
pub const METADATA_KEY_ERROR: &str = "error";

/// Metadata keys only execution may write; owner updates touching them are rejected
pub const ENGINE_METADATA_KEYS: [&str; 4] = [
    METADATA_KEY_FILE_NAME,
    METADATA_KEY_CONTENT_TYPE,
    METADATA_KEY_BYTES_DOWNLOADED,
    METADATA_KEY_ERROR,
];

macro_rules! sqlite_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Create a new identifier
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl PartialEq<i64> for $name {
            fn eq(&self, other: &i64) -> bool {
                self.0 == *other
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

sqlite_id!(
    /// Unique identifier for a download task, assigned by the task store
    TaskId
);

sqlite_id!(
    /// Unique identifier for an account
    AccountId
);

/// Download task status
///
/// The integer codes are the values persisted in the `status` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be claimed for execution
    Pending,
    /// Claimed by exactly one executor
    Downloading,
    /// Last execution failed; eligible for recovery
    Failed,
    /// Content is available for read-back
    Success,
}

impl TaskStatus {
    /// Convert a persisted status code, `None` for unknown codes
    pub fn from_i32(status: i32) -> Option<Self> {
        match status {
            1 => Some(TaskStatus::Pending),
            2 => Some(TaskStatus::Downloading),
            3 => Some(TaskStatus::Failed),
            4 => Some(TaskStatus::Success),
            _ => None,
        }
    }

    /// Convert to the persisted status code
    pub fn to_i32(&self) -> i32 {
        match self {
            TaskStatus::Pending => 1,
            TaskStatus::Downloading => 2,
            TaskStatus::Failed => 3,
            TaskStatus::Success => 4,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    ///
    /// `Pending → Downloading → {Success, Failed}` plus the recovery edge
    /// `Failed → Pending`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Downloading)
                | (TaskStatus::Downloading, TaskStatus::Success)
                | (TaskStatus::Downloading, TaskStatus::Failed)
                | (TaskStatus::Failed, TaskStatus::Pending)
        )
    }

    /// Whether the status ends an execution attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Failed => "failed",
            TaskStatus::Success => "success",
        };
        f.write_str(name)
    }
}

/// Protocol used to fetch a task's resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownloadType {
    /// Plain HTTP(S) GET
    Http,
}

impl DownloadType {
    /// Convert a persisted type code, `None` for unknown codes
    pub fn from_i32(download_type: i32) -> Option<Self> {
        match download_type {
            1 => Some(DownloadType::Http),
            _ => None,
        }
    }

    /// Convert to the persisted type code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadType::Http => 1,
        }
    }
}

impl std::fmt::Display for DownloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadType::Http => f.write_str("http"),
        }
    }
}

impl std::str::FromStr for DownloadType {
    type Err = String;

    /// Accepts the type name in any case or its persisted code
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("http") {
            return Ok(DownloadType::Http);
        }
        s.parse::<i32>()
            .ok()
            .and_then(DownloadType::from_i32)
            .ok_or_else(|| s.to_string())
    }
}

/// A persisted download task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Task identifier
    pub id: TaskId,
    /// Account that created the task
    pub owner_account_id: AccountId,
    /// Protocol selector
    pub download_type: DownloadType,
    /// Source resource locator
    pub url: String,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// Merged metadata document
    pub metadata: Metadata,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last write to the row
    pub updated_at: DateTime<Utc>,
}

impl DownloadTask {
    /// Content-store name recorded on completion, if any
    pub fn file_name(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_KEY_FILE_NAME)
            .and_then(|v| v.as_str())
    }

    /// Content type recorded on completion, if any
    pub fn content_type(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_KEY_CONTENT_TYPE)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Account display data used to decorate task output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// Account identifier
    pub id: AccountId,
    /// Display name
    pub account_name: String,
}

/// Task as returned to callers, decorated with its owner
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskInfo {
    /// Task identifier
    pub id: TaskId,
    /// Owning account
    pub of_account: Account,
    /// Protocol selector
    pub download_type: DownloadType,
    /// Source resource locator
    pub url: String,
    /// Current lifecycle status
    pub download_status: TaskStatus,
    /// Metadata document
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    /// Creation time
    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTime<Utc>,
    /// Time of the last write to the row
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: DateTime<Utc>,
}

impl TaskInfo {
    /// Decorate a task with its owner account
    pub fn new(task: DownloadTask, of_account: Account) -> Self {
        Self {
            id: task.id,
            of_account,
            download_type: task.download_type,
            url: task.url,
            download_status: task.status,
            metadata: task.metadata,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// One page of an account's tasks
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskList {
    /// Tasks in this page, ordered by id
    pub download_task_list: Vec<TaskInfo>,
    /// Number of tasks the account owns in total
    pub total_download_task_count: u64,
}

/// Owner-initiated partial update
///
/// `None` leaves a field unchanged. Metadata is merged key by key.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct TaskUpdate {
    /// New status; only owner-permitted transitions are accepted
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Keys to merge into the metadata document
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
    /// New source locator; only accepted while the task is not executing
    #[serde(default)]
    pub url: Option<String>,
}

impl TaskUpdate {
    /// True when the update carries no change at all
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.metadata.is_none() && self.url.is_none()
    }
}

/// Outcome of one batch execution run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatchReport {
    /// Pending tasks found by the scan
    pub total: usize,
    /// Tasks that reached Success
    pub succeeded: usize,
    /// Tasks not run by this batch: claimed elsewhere first, or not started before cancellation
    pub skipped: usize,
    /// Tasks whose execution failed or panicked
    pub failed: usize,
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task persisted as Pending and its notification enqueued
    TaskCreated {
        /// Task ID
        id: TaskId,
        /// Owning account
        owner_account_id: AccountId,
    },

    /// Task claimed for execution (Pending → Downloading)
    TaskClaimed {
        /// Task ID
        id: TaskId,
        /// Owning account
        owner_account_id: AccountId,
    },

    /// Task content stored (Downloading → Success)
    TaskCompleted {
        /// Task ID
        id: TaskId,
        /// Owning account
        owner_account_id: AccountId,
    },

    /// Task execution failed (Downloading → Failed)
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Owning account
        owner_account_id: AccountId,
        /// Failure reason
        error: String,
    },

    /// Task edited by its owner
    TaskUpdated {
        /// Task ID
        id: TaskId,
        /// Owning account
        owner_account_id: AccountId,
    },

    /// Task deleted by its owner
    TaskDeleted {
        /// Task ID
        id: TaskId,
        /// Owning account
        owner_account_id: AccountId,
    },

    /// Recovery moved tasks back to Pending
    TasksRecovered {
        /// Number of tasks reset
        count: u64,
    },
}

impl Event {
    /// Owning account of the task the event is about, `None` for bulk events
    pub fn owner(&self) -> Option<AccountId> {
        match self {
            Event::TaskCreated {
                owner_account_id, ..
            }
            | Event::TaskClaimed {
                owner_account_id, ..
            }
            | Event::TaskCompleted {
                owner_account_id, ..
            }
            | Event::TaskFailed {
                owner_account_id, ..
            }
            | Event::TaskUpdated {
                owner_account_id, ..
            }
            | Event::TaskDeleted {
                owner_account_id, ..
            } => Some(*owner_account_id),
            Event::TasksRecovered { .. } => None,
        }
    }
}
