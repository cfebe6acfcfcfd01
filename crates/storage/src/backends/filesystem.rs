//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectStore, ObjectStream, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem object store.
///
/// Keys map to paths below the root; `team/hash` becomes `<root>/team/hash`.
#[derive(Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
}

fn not_found_or_io(key: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

fn with_context(e: std::io::Error, action: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(e.kind(), format!("failed to {action}: {e}")))
}

/// Sibling temp path for an in-progress write. Unique per writer so
/// concurrent uploads of the same key never share a file.
fn temp_path_for(path: &Path) -> PathBuf {
    let suffix = format!(".tmp.{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), suffix))
            .unwrap_or_else(|| suffix.clone()),
    )
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating the root if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Canonicalization touches the filesystem, so it runs on the blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Resolve a key below `root`, refusing anything that would escape it,
    /// including escapes through symlinks.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        let invalid = |reason: &str| StorageError::InvalidKey(format!("{reason}: {key:?}"));

        let relative = Path::new(key);
        if key.is_empty()
            || key.starts_with('\\')
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(invalid("key must be a relative path of plain segments"));
        }

        let path = root.join(relative);
        let root = root
            .canonicalize()
            .map_err(|e| with_context(e, "canonicalize storage root"))?;

        // Walk up to the nearest existing ancestor; it must resolve inside
        // the root even when a symlinked directory sits in between.
        let mut existing = path.as_path();
        let resolved = loop {
            match std::fs::symlink_metadata(existing) {
                Ok(meta) => {
                    break existing.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            invalid("dangling symlink")
                        } else {
                            with_context(e, "canonicalize key path")
                        }
                    })?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => match existing.parent() {
                    Some(parent) => existing = parent,
                    None => break root.clone(),
                },
                Err(e) => return Err(with_context(e, "stat key path")),
            }
        };

        if !resolved.starts_with(&root) {
            return Err(invalid("key resolves outside the storage root"));
        }
        Ok(path)
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ObjectStream> {
        use tokio::io::AsyncReadExt;

        let path = self.key_path(key).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(ObjectStream {
            size: metadata.len(),
            stream: Box::pin(stream),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        let temp_path = temp_path_for(&path);
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            file,
            temp_path,
            final_path: path,
            bytes_written: 0,
        }))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root)
            .await
            .map_err(|e| with_context(e, "access storage root"))?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root {} is not a directory", self.root.display()),
            )))
        }
    }
}

/// Streaming upload for filesystem backend.
struct FilesystemUpload {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let Self {
            file,
            temp_path,
            final_path,
            bytes_written,
        } = *self;

        file.sync_all().await?;
        drop(file);
        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let Self { file, temp_path, .. } = *self;
        drop(file);
        let _ = fs::remove_file(&temp_path).await;
        Ok(())
    }
}
