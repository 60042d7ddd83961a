//! Configuration types for idm

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use crate::error::{Error, Result};
use crate::types::AccountId;

/// Main configuration for the download task engine
///
/// Every section has defaults, so `Config::default()` runs a local,
/// filesystem-backed engine with both scheduled jobs enabled.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data storage and state management
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Where downloaded content is written
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP protocol downloader settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Dispatch channel (outbox consumer) settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Periodic jobs
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Token verification
    #[serde(default)]
    pub auth: AuthConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Engine lifecycle settings
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Load a JSON configuration file
    ///
    /// Missing sections fall back to their defaults. The result is validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.execute_pending.concurrency_limit == 0 {
            return Err(Error::Config {
                message: "concurrency limit must be at least 1".into(),
                key: Some("scheduler.execute_pending.concurrency_limit".into()),
            });
        }
        if self.scheduler.execute_pending.interval.is_zero()
            || self.scheduler.reset_failed.interval.is_zero()
        {
            return Err(Error::Config {
                message: "job interval must be greater than zero".into(),
                key: Some("scheduler".into()),
            });
        }
        if self.dispatch.batch_size == 0 {
            return Err(Error::Config {
                message: "dispatch batch size must be at least 1".into(),
                key: Some("dispatch.batch_size".into()),
            });
        }
        if let StorageConfig::ObjectStore(object) = &self.storage {
            if object.bucket.trim().is_empty() {
                return Err(Error::Config {
                    message: "object store bucket must not be empty".into(),
                    key: Some("storage.bucket".into()),
                });
            }
        }
        Ok(())
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./idm.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Content store backend selection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Files in a local directory
    Local {
        /// Root directory, created on first write (default: "./downloads")
        #[serde(default = "default_storage_root")]
        root: PathBuf,
    },
    /// Objects in an S3-compatible bucket
    ObjectStore(ObjectStoreConfig),
    /// Process-local object store, content is lost on exit
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            root: default_storage_root(),
        }
    }
}

/// S3-compatible object storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Bucket name; the bucket must already exist
    pub bucket: String,

    /// Custom endpoint (MinIO and similar)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Region (default: "us-east-1")
    #[serde(default = "default_region")]
    pub region: String,

    /// Access key id (falls back to the environment when unset)
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key (falls back to the environment when unset)
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Allow plain HTTP endpoints (default: false)
    #[serde(default)]
    pub allow_http: bool,

    /// Upper bound on bytes buffered per upload (None = unbounded)
    #[serde(default)]
    pub max_buffered_bytes: Option<u64>,
}

/// HTTP downloader configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Connect timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for the whole transfer (None = unlimited)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,

    /// User-Agent header (default: "idm/<version>")
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Retries for establishing the request, before any byte is written
    #[serde(default = "default_http_retry")]
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
            user_agent: default_user_agent(),
            retry: default_http_retry(),
        }
    }
}

/// Dispatch channel configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How often the consumer polls the outbox when not woken (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// How long a leased message stays invisible to other consumers (default: 10 minutes)
    #[serde(default = "default_visibility_timeout", with = "duration_serde")]
    pub visibility_timeout: Duration,

    /// Messages leased per poll (default: 16)
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Redelivery policy for failed handlers
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            visibility_timeout: default_visibility_timeout(),
            batch_size: default_batch_size(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Periodic job configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Batch execution of pending tasks
    #[serde(default)]
    pub execute_pending: ExecutePendingJobConfig,

    /// Recovery of failed tasks
    #[serde(default)]
    pub reset_failed: ResetFailedJobConfig,
}

/// Batch execution job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutePendingJobConfig {
    /// Run the job (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between runs (default: 60 seconds)
    #[serde(default = "default_execute_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Maximum downloads in flight during one run (default: 4)
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

impl Default for ExecutePendingJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_execute_interval(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

/// Recovery job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResetFailedJobConfig {
    /// Run the job (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between runs (default: 5 minutes)
    #[serde(default = "default_reset_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Also reset tasks stuck in Downloading for longer than this (None = never)
    #[serde(default, with = "optional_duration_serde")]
    pub stale_downloading_after: Option<Duration>,
}

impl Default for ResetFailedJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_reset_interval(),
            stale_downloading_after: None,
        }
    }
}

/// Token verification configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer tokens accepted by the static verifier
    #[serde(default)]
    pub tokens: Vec<StaticTokenConfig>,
}

/// One accepted token
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StaticTokenConfig {
    /// Token value as sent by the client
    pub token: String,

    /// Account the token authenticates
    pub account_id: AccountId,

    /// Expiry (None = never expires)
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,

    /// Largest page size accepted by the list endpoint (default: 100)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
            max_page_size: default_max_page_size(),
        }
    }
}

/// Engine lifecycle configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long shutdown waits for in-flight executions (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: default_shutdown_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./idm.db")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    format!("idm/{}", env!("CARGO_PKG_VERSION"))
}

fn default_http_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        ..RetryConfig::default()
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_batch_size() -> u32 {
    16
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_execute_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_reset_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_page_size() -> u64 {
    100
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_event_capacity() -> usize {
    1000
}

// Duration serialization helper (as seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
