//! Protocol downloaders
//!
//! A [`Downloader`] streams one remote resource into a writer and reports
//! metadata about it. The [`DownloaderRegistry`] maps each [`DownloadType`]
//! to its implementation and is built once at startup.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::config::HttpConfig;
use crate::error::Result;
use crate::types::{DownloadType, Metadata};

mod http;

pub use http::HttpDownloader;

/// Trait for fetching a remote resource into a content writer
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream the resource at `url` into `sink`
    ///
    /// The sink is not shut down; the caller finalizes it. Returns metadata
    /// describing the content, at least the declared content type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Cancelled`] when `cancel` fires mid-transfer,
    /// network and remote-status errors from the fetch, and I/O errors from
    /// the sink.
    async fn download(
        &self,
        url: &str,
        cancel: &CancellationToken,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<Metadata>;

    /// Type this downloader handles
    fn download_type(&self) -> DownloadType;

    /// Name for logs
    fn name(&self) -> &'static str;
}

/// Lookup table from download type to downloader
#[derive(Clone, Default)]
pub struct DownloaderRegistry {
    downloaders: HashMap<DownloadType, Arc<dyn Downloader>>,
}

impl DownloaderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in downloader
    pub fn with_defaults(http: &HttpConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpDownloader::new(http.clone())?));
        Ok(registry)
    }

    /// Register `downloader` for the type it reports, replacing any previous one
    pub fn register(&mut self, downloader: Arc<dyn Downloader>) -> &mut Self {
        let download_type = downloader.download_type();
        if let Some(previous) = self.downloaders.insert(download_type, downloader) {
            tracing::debug!(
                download_type = %download_type,
                replaced = previous.name(),
                "replaced registered downloader"
            );
        }
        self
    }

    /// Downloader for `download_type`, if one is registered
    pub fn get(&self, download_type: DownloadType) -> Option<Arc<dyn Downloader>> {
        self.downloaders.get(&download_type).cloned()
    }

    /// Whether `download_type` can be executed
    pub fn supports(&self, download_type: DownloadType) -> bool {
        self.downloaders.contains_key(&download_type)
    }
}

impl std::fmt::Debug for DownloaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&'static str> = self.downloaders.values().map(|d| d.name()).collect();
        f.debug_struct("DownloaderRegistry")
            .field("downloaders", &names)
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_http() {
        let registry = DownloaderRegistry::with_defaults(&HttpConfig::default()).unwrap();
        assert!(registry.supports(DownloadType::Http));
        assert_eq!(registry.get(DownloadType::Http).unwrap().name(), "http");
    }

    #[test]
    fn empty_registry_supports_nothing() {
        let registry = DownloaderRegistry::new();
        assert!(!registry.supports(DownloadType::Http));
        assert!(registry.get(DownloadType::Http).is_none());
    }
}
