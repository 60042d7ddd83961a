//! Local filesystem content store

use async_trait::async_trait;
use std::path::PathBuf;

use super::{ContentReader, ContentStore, ContentWriter, validate_name};
use crate::error::{Result, StorageError};

/// Stores each name as a file directly under `root`
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    /// Create a store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn open_write(&self, name: &str) -> Result<ContentWriter> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let file = tokio::fs::File::create(&path).await?;
        tracing::debug!(path = %path.display(), "opened local content for writing");
        Ok(Box::pin(file))
    }

    async fn open_read(&self, name: &str) -> Result<ContentReader> {
        let path = self.path_for(name)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
