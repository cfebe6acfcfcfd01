//! HTTP remote cache server for Turborepo-compatible build clients.
//!
//! This crate provides:
//! - Bearer-token authorization for the artifact endpoints
//! - Artifact fetch and store, streamed to and from the object store
//! - A liveness probe and Prometheus metrics

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod transfer;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
