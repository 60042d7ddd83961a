//! HTTP(S) downloader

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::Downloader;
use crate::config::{HttpConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::retry_with_backoff;
use crate::types::{DownloadType, METADATA_KEY_BYTES_DOWNLOADED, METADATA_KEY_CONTENT_TYPE, Metadata};

/// Downloads a resource with a single GET and streams the body to the sink
///
/// Establishing the request is retried on transient failures (connect
/// errors, timeouts, 5xx, 429). Once the first body byte was written the
/// transfer is not retried; the task-level recovery handles that.
pub struct HttpDownloader {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpDownloader {
    /// Build the HTTP client from configuration
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            retry: config.retry,
        })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::RemoteStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &str,
        cancel: &CancellationToken,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<Metadata> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = retry_with_backoff(&self.retry, || self.send(url)) => response?,
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut body = response.bytes_stream();
        let mut written: u64 = 0;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    sink.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        sink.flush().await?;

        tracing::debug!(url, bytes = written, content_type = %content_type, "HTTP download finished");

        let mut metadata = Metadata::new();
        metadata.insert(METADATA_KEY_CONTENT_TYPE.to_string(), content_type.into());
        metadata.insert(METADATA_KEY_BYTES_DOWNLOADED.to_string(), written.into());
        Ok(metadata)
    }

    fn download_type(&self) -> DownloadType {
        DownloadType::Http
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
