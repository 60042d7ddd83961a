//! Content store: where downloaded bytes live
//!
//! A task's payload is written and read back by a logical name (the engine
//! uses the task ID). Two backends exist:
//!
//! - [`LocalContentStore`] - one file per name under a root directory
//! - [`ObjectContentStore`] - one object per name in an [`object_store::ObjectStore`]

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::StorageConfig;
use crate::error::{Error, Result, StorageError};

mod local;
mod object;

pub use local::LocalContentStore;
pub use object::ObjectContentStore;

/// Readable content stream
pub type ContentReader = Pin<Box<dyn AsyncRead + Send>>;

/// Writable content stream
///
/// The write is complete only once [`tokio::io::AsyncWriteExt::shutdown`]
/// returned `Ok`. Until then readers may see partial content or none at all.
pub type ContentWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Trait for task content storage backends
///
/// # Examples
///
/// ```no_run
/// use idm::storage::{ContentStore, LocalContentStore};
/// use tokio::io::{AsyncReadExt, AsyncWriteExt};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = LocalContentStore::new("./downloads");
///
/// let mut writer = store.open_write("42").await?;
/// writer.write_all(b"hello").await?;
/// writer.shutdown().await?;
///
/// let mut content = Vec::new();
/// store.open_read("42").await?.read_to_end(&mut content).await?;
/// assert_eq!(content, b"hello");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Open `name` for writing, replacing any previous content
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidName`] for names the backend cannot
    /// address, or an I/O error when the target cannot be created.
    async fn open_write(&self, name: &str) -> Result<ContentWriter>;

    /// Open `name` for reading
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when nothing was stored under `name`.
    async fn open_read(&self, name: &str) -> Result<ContentReader>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the content store selected in the configuration
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ContentStore>> {
    match config {
        StorageConfig::Local { root } => Ok(Arc::new(LocalContentStore::new(root))),
        StorageConfig::ObjectStore(object) => Ok(Arc::new(ObjectContentStore::from_config(object)?)),
        StorageConfig::Memory => Ok(Arc::new(ObjectContentStore::in_memory())),
    }
}

/// Reject names that could escape the backend's namespace
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(Error::Storage(StorageError::InvalidName(name.to_string())));
    }
    Ok(())
}
