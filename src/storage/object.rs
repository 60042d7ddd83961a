//! Object storage content store
//!
//! Writes never wait on the network per chunk: the writer forwards chunks to
//! a background task that buffers them and uploads a single object when the
//! writer is shut down. Reads stream the object body directly.

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;

use super::{ContentReader, ContentStore, ContentWriter, validate_name};
use crate::config::ObjectStoreConfig;
use crate::error::{Result, StorageError};

/// Stores each name as one object in a bucket
#[derive(Clone)]
pub struct ObjectContentStore {
    store: Arc<dyn ObjectStore>,
    max_buffered_bytes: Option<u64>,
}

impl std::fmt::Debug for ObjectContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectContentStore")
            .field("store", &self.store.to_string())
            .field("max_buffered_bytes", &self.max_buffered_bytes)
            .finish()
    }
}

impl ObjectContentStore {
    /// Wrap an existing object store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            max_buffered_bytes: None,
        }
    }

    /// Process-local store, mostly useful for tests
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Build an S3-compatible store
    ///
    /// Credentials missing from the configuration are taken from the
    /// standard `AWS_*` environment variables.
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key) = &config.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        let store = builder.build().map_err(StorageError::ObjectStore)?;
        tracing::info!(bucket = %config.bucket, "object storage content store configured");

        Ok(Self {
            store: Arc::new(store),
            max_buffered_bytes: config.max_buffered_bytes,
        })
    }

    /// Fail writes once more than `limit` bytes are buffered for one upload
    pub fn with_max_buffered_bytes(mut self, limit: u64) -> Self {
        self.max_buffered_bytes = Some(limit);
        self
    }
}

#[async_trait]
impl ContentStore for ObjectContentStore {
    async fn open_write(&self, name: &str) -> Result<ContentWriter> {
        validate_name(name)?;
        let location = ObjectPath::from(name);
        Ok(Box::pin(BufferedUpload::start(
            self.store.clone(),
            location,
            self.max_buffered_bytes,
        )))
    }

    async fn open_read(&self, name: &str) -> Result<ContentReader> {
        validate_name(name)?;
        let location = ObjectPath::from(name);
        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(name.to_string()).into());
            }
            Err(e) => return Err(StorageError::ObjectStore(e).into()),
        };

        let body = result.into_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }

    fn name(&self) -> &'static str {
        "object_store"
    }
}

enum UploadChunk {
    Data(Vec<u8>),
    Finish,
}

/// Writer half of a background upload
///
/// Dropping it without a successful shutdown abandons the upload, so a
/// failed download never replaces an existing object with partial content.
struct BufferedUpload {
    sender: Option<mpsc::UnboundedSender<UploadChunk>>,
    upload: Option<JoinHandle<std::result::Result<(), object_store::Error>>>,
    buffered: u64,
    max_buffered_bytes: Option<u64>,
}

impl BufferedUpload {
    fn start(
        store: Arc<dyn ObjectStore>,
        location: ObjectPath,
        max_buffered_bytes: Option<u64>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let upload = tokio::spawn(run_upload(store, location, receiver));
        Self {
            sender: Some(sender),
            upload: Some(upload),
            buffered: 0,
            max_buffered_bytes,
        }
    }
}

async fn run_upload(
    store: Arc<dyn ObjectStore>,
    location: ObjectPath,
    mut receiver: mpsc::UnboundedReceiver<UploadChunk>,
) -> std::result::Result<(), object_store::Error> {
    let mut buffer = Vec::new();
    while let Some(chunk) = receiver.recv().await {
        match chunk {
            UploadChunk::Data(bytes) => buffer.extend_from_slice(&bytes),
            UploadChunk::Finish => {
                let size = buffer.len();
                store.put(&location, PutPayload::from(buffer)).await?;
                tracing::debug!(location = %location, size, "object uploaded");
                return Ok(());
            }
        }
    }

    tracing::debug!(location = %location, "upload abandoned before shutdown");
    Ok(())
}

impl AsyncWrite for BufferedUpload {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let len = buf.len() as u64;

        if let Some(limit) = this.max_buffered_bytes {
            if this.buffered.saturating_add(len) > limit {
                return Poll::Ready(Err(io::Error::other(format!(
                    "upload buffer limit of {} bytes exceeded",
                    limit
                ))));
            }
        }

        let Some(sender) = &this.sender else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after shutdown",
            )));
        };
        if sender.send(UploadChunk::Data(buf.to_vec())).is_err() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "upload task stopped",
            )));
        }

        this.buffered += len;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some(sender) = this.sender.take() {
            // A closed channel here surfaces as the upload task's own result below
            let _ = sender.send(UploadChunk::Finish);
        }

        let Some(upload) = this.upload.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        match Pin::new(upload).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(joined) => {
                this.upload = None;
                match joined {
                    Ok(Ok(())) => Poll::Ready(Ok(())),
                    Ok(Err(e)) => Poll::Ready(Err(io::Error::other(e))),
                    Err(e) => Poll::Ready(Err(io::Error::other(e))),
                }
            }
        }
    }
}
