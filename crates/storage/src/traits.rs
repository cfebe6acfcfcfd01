//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// An object opened for reading.
pub struct ObjectStream {
    /// Object size in bytes.
    pub size: u64,
    /// Object content.
    pub stream: ByteStream,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Object store abstraction for artifact storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Open an object for streaming reads.
    ///
    /// Returns [`crate::StorageError::NotFound`] when the key does not exist.
    async fn get_stream(&self, key: &str) -> StorageResult<ObjectStream>;

    /// Start a streaming upload. The object becomes visible on `finish`.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Get the name of this storage backend.
    ///
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called once at startup, before the server accepts requests.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding anything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
