//! Application state shared across handlers.

use cairn_core::TokenSet;
use cairn_core::config::AppConfig;
use cairn_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
///
/// Everything here is read-only after startup and cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Artifact store.
    pub storage: Arc<dyn ObjectStore>,
    /// Tokens allowed to use the artifact endpoints.
    pub tokens: Arc<TokenSet>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectStore>) -> Self {
        let tokens = Arc::new(config.auth.token_set());
        Self {
            config: Arc::new(config),
            storage,
            tokens,
        }
    }
}
