//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::{Body, Bytes};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Request, StatusCode};
use cairn_core::config::TokenList;
use common::{FailingBackend, TEST_TOKEN, TestServer};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

/// Send a request and collect the whole response.
async fn send(
    router: &axum::Router,
    method: &str,
    uri: &str,
    authorization: Option<&str>,
    body: impl Into<Body>,
) -> (StatusCode, HeaderMap, Bytes) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }

    let request = builder.body(body.into()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn json_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

async fn put(server: &TestServer, uri: &str, body: &'static [u8]) -> StatusCode {
    let (status, _, _) = send(
        &server.router,
        "PUT",
        uri,
        Some(&bearer(TEST_TOKEN)),
        Bytes::from_static(body),
    )
    .await;
    status
}

async fn get(server: &TestServer, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    send(
        &server.router,
        "GET",
        uri,
        Some(&bearer(TEST_TOKEN)),
        Body::empty(),
    )
    .await
}

// =============================================================================
// Round trips
// =============================================================================

#[tokio::test]
async fn test_store_then_fetch_scenario() {
    let server = TestServer::with_config(|config| {
        config.auth.allowed_tokens = TokenList::new(["tok-A"]);
    })
    .await;
    let router = &server.router;

    let (status, _, body) = send(
        router,
        "PUT",
        "/v8/artifacts/h1?teamId=team1",
        Some("Bearer tok-A"),
        "hello",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.is_empty());

    let (status, headers, body) = send(
        router,
        "GET",
        "/v8/artifacts/h1?teamId=team1",
        Some("Bearer tok-A"),
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"hello");
    assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
    assert_eq!(headers[CONTENT_LENGTH], "5");

    let (status, _, body) = send(
        router,
        "GET",
        "/v8/artifacts/h1?teamId=team1",
        Some("Bearer wrong"),
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body), json!({ "message": "invalid token" }));

    let (status, _, body) = send(
        router,
        "GET",
        "/v8/artifacts/missing?teamId=team1",
        Some("Bearer tok-A"),
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json_body(&body)["error"].is_string());
}

#[tokio::test]
async fn test_overwrite_returns_latest() {
    let server = TestServer::new().await;

    assert_eq!(
        put(&server, "/v8/artifacts/h1?slug=web", b"v1").await,
        StatusCode::CREATED
    );
    assert_eq!(
        put(&server, "/v8/artifacts/h1?slug=web", b"v2").await,
        StatusCode::CREATED
    );

    let (status, _, body) = get(&server, "/v8/artifacts/h1?slug=web").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"v2");
}

#[tokio::test]
async fn test_zero_length_artifact() {
    let server = TestServer::new().await;

    assert_eq!(
        put(&server, "/v8/artifacts/empty?teamId=team1", b"").await,
        StatusCode::CREATED
    );

    let (status, headers, body) = get(&server, "/v8/artifacts/empty?teamId=team1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONTENT_LENGTH], "0");
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_large_artifact_round_trip() {
    let server = TestServer::new().await;
    let data: Vec<u8> = (0..3 * 1024 * 1024 + 17).map(|i| (i % 251) as u8).collect();

    let (status, _, _) = send(
        &server.router,
        "PUT",
        "/v8/artifacts/big?teamId=team1",
        Some(&bearer(TEST_TOKEN)),
        data.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = get(&server, "/v8/artifacts/big?teamId=team1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), data.as_slice());
}

// =============================================================================
// Addressing
// =============================================================================

#[tokio::test]
async fn test_slug_takes_precedence_over_team() {
    let server = TestServer::new().await;

    assert_eq!(
        put(&server, "/v8/artifacts/h1?teamId=team1&slug=web", b"by-slug").await,
        StatusCode::CREATED
    );
    assert!(server.storage_root().join("web").join("h1").is_file());

    let (status, _, body) = get(&server, "/v8/artifacts/h1?slug=web").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"by-slug");

    let (status, _, _) = get(&server, "/v8/artifacts/h1?teamId=team1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scopes_are_isolated() {
    let server = TestServer::new().await;

    put(&server, "/v8/artifacts/h1?teamId=team1", b"one").await;
    put(&server, "/v8/artifacts/h1?teamId=team2", b"two").await;

    let (_, _, body) = get(&server, "/v8/artifacts/h1?teamId=team1").await;
    assert_eq!(body.as_ref(), b"one");
    let (_, _, body) = get(&server, "/v8/artifacts/h1?teamId=team2").await;
    assert_eq!(body.as_ref(), b"two");
}

#[tokio::test]
async fn test_missing_scope_is_bad_request() {
    let server = TestServer::new().await;

    for uri in [
        "/v8/artifacts/h1",
        "/v8/artifacts/h1?teamId=",
        "/v8/artifacts/h1?teamId=&slug=",
    ] {
        for method in ["GET", "PUT"] {
            let (status, _, body) = send(
                &server.router,
                method,
                uri,
                Some(&bearer(TEST_TOKEN)),
                "data",
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{method} {uri}");
            assert_eq!(
                json_body(&body),
                json!({ "error": "teamId or slug are required" })
            );
        }
    }
}

#[tokio::test]
async fn test_unsafe_identifiers_are_rejected() {
    let server = TestServer::new().await;

    for uri in [
        "/v8/artifacts/h1?teamId=..",
        "/v8/artifacts/h1?slug=a%2Fb",
        "/v8/artifacts/h1?teamId=a%5Cb",
        "/v8/artifacts/..?teamId=team1",
        "/v8/artifacts/h%2F1?teamId=team1",
    ] {
        let (status, _, body) = send(
            &server.router,
            "PUT",
            uri,
            Some(&bearer(TEST_TOKEN)),
            "data",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(json_body(&body)["error"].is_string());
    }
}

// =============================================================================
// Authorization
// =============================================================================

#[tokio::test]
async fn test_rejected_authorization_headers() {
    let server = TestServer::new().await;

    let cases = [
        (None, "missing Authorization header"),
        (Some("Basic abc"), "invalid Authorization header format"),
        (Some("Bearer"), "invalid Authorization header format"),
        (Some("Bearer "), "invalid Authorization header format"),
        (Some("Bearer a b"), "invalid Authorization header format"),
        (Some("Bearer wrong"), "invalid token"),
    ];

    for (authorization, message) in cases {
        for method in ["GET", "PUT"] {
            let (status, _, body) = send(
                &server.router,
                method,
                "/v8/artifacts/h1?teamId=team1",
                authorization,
                "data",
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{authorization:?}");
            assert_eq!(json_body(&body), json!({ "message": message }));
        }
    }

    // Nothing was written by the rejected uploads.
    let (status, _, _) = get(&server, "/v8/artifacts/h1?teamId=team1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_authorization_precedes_scope_check() {
    let server = TestServer::new().await;

    let (status, _, _) = send(
        &server.router,
        "GET",
        "/v8/artifacts/h1",
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bearer_scheme_is_case_insensitive() {
    let server = TestServer::new().await;

    let (status, _, _) = send(
        &server.router,
        "PUT",
        "/v8/artifacts/h1?teamId=team1",
        Some(&format!("bearer {TEST_TOKEN}")),
        "data",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_any_listed_token_is_accepted() {
    let server = TestServer::with_config(|config| {
        config.auth.allowed_tokens = TokenList::new(["tok-A", "tok-B"]);
    })
    .await;

    for token in ["tok-A", "tok-B"] {
        let (status, _, _) = send(
            &server.router,
            "GET",
            "/v8/artifacts/missing?teamId=team1",
            Some(&bearer(token)),
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{token}");
    }
}

// =============================================================================
// Status and metrics
// =============================================================================

#[tokio::test]
async fn test_status_requires_no_auth() {
    let server = TestServer::new().await;

    let (status, _, body) = send(&server.router, "GET", "/_/status", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({ "message": "ok" }));
}

#[tokio::test]
async fn test_trace_id_is_echoed() {
    let server = TestServer::new().await;

    let request = Request::builder()
        .uri("/_/status")
        .header("x-trace-id", "build-42")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-trace-id"], "build-42");

    // Rejected requests carry a generated ID.
    let (status, headers, _) =
        send(&server.router, "GET", "/v8/artifacts/h1?teamId=team1", None, Body::empty()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let generated = headers["x-trace-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(generated).is_ok(), "{generated}");
}

#[tokio::test]
async fn test_status_ignores_storage_health() {
    let server = TestServer::with_storage(Arc::new(FailingBackend), |_| {}).await;

    let (status, _, _) = send(&server.router, "GET", "/_/status", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    cairn_server::metrics::register_metrics();
    let server = TestServer::new().await;

    put(&server, "/v8/artifacts/h1?teamId=team1", b"hello").await;

    let (status, _, body) = send(&server.router, "GET", "/metrics", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("cairn_artifact_uploads_total"));
}

#[tokio::test]
async fn test_metrics_can_be_disabled() {
    let server = TestServer::with_config(|config| {
        config.server.metrics_enabled = false;
    })
    .await;

    let (status, _, _) = send(&server.router, "GET", "/metrics", None, Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Storage faults
// =============================================================================

#[tokio::test]
async fn test_upload_store_fault_is_server_error() {
    let server = TestServer::with_storage(Arc::new(FailingBackend), |_| {}).await;

    let (status, _, body) = send(
        &server.router,
        "PUT",
        "/v8/artifacts/h1?teamId=team1",
        Some(&bearer(TEST_TOKEN)),
        "data",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(&body), json!({ "error": "I/O error: backend unavailable" }));
}

#[tokio::test]
async fn test_download_store_fault_is_server_error() {
    let server = TestServer::with_storage(Arc::new(FailingBackend), |_| {}).await;

    let (status, _, body) = get(&server, "/v8/artifacts/h1?teamId=team1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json_body(&body)["error"].is_string());
}

#[tokio::test]
async fn test_legacy_download_errors_report_not_found() {
    let server = TestServer::with_storage(Arc::new(FailingBackend), |config| {
        config.server.legacy_download_errors = true;
    })
    .await;

    let (status, _, body) = get(&server, "/v8/artifacts/h1?teamId=team1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json_body(&body)["error"].is_string());
}
