//! Server test utilities.

use cairn_core::config::AppConfig;
use cairn_server::{AppState, create_router};
use cairn_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Token accepted by every test server.
#[allow(dead_code)]
pub const TEST_TOKEN: &str = "test-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary filesystem storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("storage");

        let mut config = AppConfig::for_testing(&storage_path);
        modifier(&mut config);

        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );
        Self::from_parts(config, storage, temp_dir)
    }

    /// Create a test server backed by an arbitrary store.
    pub async fn with_storage<F>(storage: Arc<dyn ObjectStore>, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);
        Self::from_parts(config, storage, temp_dir)
    }

    fn from_parts(config: AppConfig, storage: Arc<dyn ObjectStore>, temp_dir: TempDir) -> Self {
        let state = AppState::new(config, storage);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Path of the on-disk store, for tests that inspect layout.
    pub fn storage_root(&self) -> std::path::PathBuf {
        self._temp_dir.path().join("storage")
    }
}
