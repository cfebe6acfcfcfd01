//! Storage test utilities.

use async_trait::async_trait;
use cairn_storage::{ObjectStore, ObjectStream, StorageError, StorageResult, StreamingUpload};

/// A store whose every operation fails with an I/O error.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FailingBackend;

fn fault() -> StorageError {
    StorageError::Io(std::io::Error::other("backend unavailable"))
}

#[async_trait]
impl ObjectStore for FailingBackend {
    async fn get_stream(&self, _key: &str) -> StorageResult<ObjectStream> {
        Err(fault())
    }

    async fn put_stream(&self, _key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Err(fault())
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
