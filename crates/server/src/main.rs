//! Cairn server binary.

use anyhow::{Context, Result};
use cairn_core::config::AppConfig;
use cairn_server::{AppState, create_router};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cairn - a remote build cache for Turborepo-compatible clients
#[derive(Parser, Debug)]
#[command(name = "cairnd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CAIRN_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Cairn v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; environment variables can provide everything.
    let config_path = Path::new(&args.config);
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let config = AppConfig::load(Some(config_path)).context("failed to load configuration")?;
    tracing::info!(
        tokens = config.auth.token_set().len(),
        "Configuration loaded"
    );

    cairn_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = cairn_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Fail fast on unreachable storage rather than serving errors.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    let addr = config.server.bind_addr().context("invalid bind address")?;
    let app = create_router(AppState::new(config, storage));

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
