//! Streaming transfers between HTTP bodies and the object store.
//!
//! Neither direction buffers a whole artifact. Uploads are written chunk by
//! chunk and only become visible once the body has been fully consumed; a
//! failed or cancelled upload leaves any previous object under the key intact.

use bytes::Bytes;
use cairn_core::StorageKey;
use cairn_storage::{ObjectStore, ObjectStream, StorageError, StreamingUpload};
use futures::{Stream, StreamExt};
use std::fmt::Display;

/// Why an upload did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The client's request body failed mid-stream.
    #[error("failed to read request body: {0}")]
    Body(String),

    /// The store refused or failed the write.
    #[error(transparent)]
    Store(#[from] StorageError),
}

/// Aborts an in-flight upload if it is dropped before completion.
///
/// Handler futures are dropped when a client disconnects, so the abort
/// runs on a spawned task.
struct UploadGuard {
    upload: Option<Box<dyn StreamingUpload>>,
    key: String,
    runtime_handle: Option<tokio::runtime::Handle>,
}

impl UploadGuard {
    fn new(upload: Box<dyn StreamingUpload>, key: &StorageKey) -> Self {
        Self {
            upload: Some(upload),
            key: key.to_string(),
            runtime_handle: tokio::runtime::Handle::try_current().ok(),
        }
    }

    async fn write(&mut self, data: Bytes) -> Result<(), StorageError> {
        match self.upload.as_mut() {
            Some(upload) => upload.write(data).await,
            None => Err(StorageError::Io(std::io::Error::other(
                "upload already completed",
            ))),
        }
    }

    async fn finish(mut self) -> Result<u64, StorageError> {
        let upload = self
            .upload
            .take()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("upload already completed")))?;
        upload.finish().await
    }

    async fn abort(mut self) {
        if let Some(upload) = self.upload.take()
            && let Err(e) = upload.abort().await
        {
            tracing::warn!(key = %self.key, error = %e, "Failed to abort upload");
        }
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        let Some(upload) = self.upload.take() else {
            return;
        };
        let key = std::mem::take(&mut self.key);
        match &self.runtime_handle {
            Some(handle) => {
                handle.spawn(async move {
                    match upload.abort().await {
                        Ok(()) => tracing::debug!(key = %key, "Aborted abandoned upload"),
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "Failed to abort abandoned upload")
                        }
                    }
                });
            }
            None => {
                tracing::warn!(key = %key, "Upload dropped without runtime; partial data may remain");
            }
        }
    }
}

/// Stream `body` into the store under `key`.
///
/// Returns the number of bytes stored. On any error the partial upload is
/// aborted and the previous object, if any, is left untouched.
pub async fn upload<S, E>(
    store: &dyn ObjectStore,
    key: &StorageKey,
    body: S,
) -> Result<u64, TransferError>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
{
    let mut guard = UploadGuard::new(store.put_stream(key.as_str()).await?, key);
    let mut body = std::pin::pin!(body);

    while let Some(chunk) = body.next().await {
        let result = match chunk {
            Ok(data) if data.is_empty() => continue,
            Ok(data) => guard.write(data).await.map_err(TransferError::Store),
            Err(e) => Err(TransferError::Body(e.to_string())),
        };
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Upload interrupted, aborting");
            guard.abort().await;
            return Err(e);
        }
    }

    Ok(guard.finish().await?)
}

/// Result of looking up an artifact for download.
#[derive(Debug)]
pub enum Download {
    /// The artifact exists; its bytes follow in the stream.
    Found(ObjectStream),
    /// Nothing is stored under the key.
    NotFound,
}

/// Open the object stored under `key`.
///
/// A missing key is a normal outcome, not an error. Any other store failure
/// is returned as is.
pub async fn download(store: &dyn ObjectStore, key: &StorageKey) -> Result<Download, StorageError> {
    match store.get_stream(key.as_str()).await {
        Ok(object) => Ok(Download::Found(object)),
        Err(e) if e.is_not_found() => Ok(Download::NotFound),
        Err(e) => Err(e),
    }
}
