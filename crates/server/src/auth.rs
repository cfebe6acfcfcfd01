//! Request tracing and bearer-token middleware.

use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use cairn_core::{AuthRejection, authorize};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the trace ID, on requests and echoed on responses.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and stripped of
    /// anything but printable ASCII.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Run every request inside a `request` span tagged with its trace ID, and
/// return that ID in the `X-Trace-Id` response header.
pub async fn trace_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let span = tracing::info_span!("request", trace_id = %trace_id);

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Reject requests whose `Authorization` header does not carry an allowed
/// bearer token. On success the [`cairn_core::Authorized`] proof is stored in
/// the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let outcome = match req.headers().get(AUTHORIZATION) {
        None => authorize(None, &state.tokens),
        // A header that is not valid UTF-8 cannot be a bearer token.
        Some(value) => match value.to_str() {
            Ok(value) => authorize(Some(value), &state.tokens),
            Err(_) => Err(AuthRejection::MalformedHeader),
        },
    };

    match outcome {
        Ok(authorized) => {
            tracing::debug!(token = %authorized.fingerprint(), "Request authorized");
            req.extensions_mut().insert(authorized);
            Ok(next.run(req).await)
        }
        Err(rejection) => {
            tracing::debug!(
                method = %req.method(),
                path = %req.uri().path(),
                reason = rejection.as_str(),
                "Request rejected"
            );
            metrics::record_auth_rejection(rejection.as_str());
            Err(rejection.into())
        }
    }
}
