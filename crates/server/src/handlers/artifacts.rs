//! Artifact fetch and store endpoints.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use crate::transfer::{self, Download, TransferError};
use axum::body::Body;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use cairn_core::{ArtifactAddress, AuthRejection, Authorized, StorageKey};
use futures::StreamExt;
use serde::Deserialize;
use std::time::Instant;

/// Scope query parameters. At least one must be non-empty; `slug` wins
/// when both are given.
#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    #[serde(rename = "teamId")]
    pub team_id: Option<String>,
    pub slug: Option<String>,
}

impl ScopeQuery {
    fn address(&self, hash: &str) -> ApiResult<ArtifactAddress> {
        Ok(ArtifactAddress::from_identifiers(
            self.team_id.as_deref(),
            self.slug.as_deref(),
            hash,
        )?)
    }
}

/// Everything an artifact handler needs from the request head.
///
/// Extraction fails with 401 if the auth middleware did not run, and with
/// 400 if the scope is missing or an identifier is unsafe.
#[derive(Debug)]
pub struct ArtifactRequest {
    pub authorized: Authorized,
    pub address: ArtifactAddress,
    pub key: StorageKey,
}

impl FromRequestParts<AppState> for ArtifactRequest {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let authorized = parts
            .extensions
            .get::<Authorized>()
            .cloned()
            .ok_or(ApiError::Unauthorized(AuthRejection::MissingHeader))?;

        let Path(hash) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let Query(scope) = Query::<ScopeQuery>::try_from_uri(&parts.uri)
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        let address = scope.address(&hash)?;
        let key = address.storage_key();
        Ok(Self {
            authorized,
            address,
            key,
        })
    }
}

/// GET /v8/artifacts/{hash} - Stream a stored artifact back to the client.
pub async fn get_artifact(
    State(state): State<AppState>,
    ArtifactRequest { authorized, key, .. }: ArtifactRequest,
) -> ApiResult<Response> {
    match transfer::download(state.storage.as_ref(), &key).await {
        Ok(Download::Found(object)) => {
            metrics::record_download("hit");
            metrics::BYTES_DOWNLOADED.inc_by(object.size);
            tracing::debug!(
                key = %key,
                size = object.size,
                token = %authorized.fingerprint(),
                "Serving artifact"
            );

            let size = object.size.to_string();
            let body_stream = object
                .stream
                .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

            Ok((
                StatusCode::OK,
                [
                    (CONTENT_TYPE, "application/octet-stream"),
                    (CONTENT_LENGTH, size.as_str()),
                ],
                Body::from_stream(body_stream),
            )
                .into_response())
        }
        Ok(Download::NotFound) => {
            metrics::record_download("miss");
            Err(ApiError::NotFound("artifact not found".to_string()))
        }
        Err(e) => {
            metrics::record_download("error");
            if state.config.server.legacy_download_errors {
                tracing::warn!(key = %key, error = %e, "Storage error reported as not found");
                Err(ApiError::NotFound(e.to_string()))
            } else {
                Err(e.into())
            }
        }
    }
}

/// PUT /v8/artifacts/{hash} - Stream the request body into the store.
///
/// Responds `201 Created` with an empty body once the object is durable.
pub async fn put_artifact(
    State(state): State<AppState>,
    ArtifactRequest {
        authorized,
        address,
        key,
    }: ArtifactRequest,
    body: Body,
) -> ApiResult<StatusCode> {
    let start_time = Instant::now();

    match transfer::upload(state.storage.as_ref(), &key, body.into_data_stream()).await {
        Ok(size) => {
            metrics::UPLOAD_DURATION.observe(start_time.elapsed().as_secs_f64());
            metrics::BYTES_UPLOADED.inc_by(size);
            metrics::record_upload("stored");
            tracing::info!(
                scope = address.scope_id(),
                hash = address.hash(),
                size,
                token = %authorized.fingerprint(),
                "Artifact stored"
            );
            Ok(StatusCode::CREATED)
        }
        Err(e @ TransferError::Body(_)) => {
            metrics::record_upload("body_error");
            Err(ApiError::BadRequest(e.to_string()))
        }
        Err(TransferError::Store(e)) => {
            metrics::record_upload("store_error");
            Err(e.into())
        }
    }
}
