//! Liveness probe.

use axum::Json;
use serde::Serialize;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub message: &'static str,
}

/// GET /_/status - Liveness probe.
///
/// Unauthenticated and independent of storage so load balancers can poll it.
pub async fn get_status() -> Json<StatusResponse> {
    Json(StatusResponse { message: "ok" })
}
