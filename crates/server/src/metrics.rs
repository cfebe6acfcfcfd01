//! Prometheus metrics for the Cairn server.
//!
//! Metrics carry no team, slug or hash labels; only outcomes and volumes.
//! The `/metrics` endpoint is unauthenticated and should be reachable only
//! from the Prometheus scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Artifact transfer metrics
pub static ARTIFACT_UPLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cairn_artifact_uploads_total",
            "Artifact uploads by outcome (stored, body_error, store_error)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static ARTIFACT_DOWNLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cairn_artifact_downloads_total",
            "Artifact downloads by outcome (hit, miss, error)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cairn_bytes_uploaded_total",
        "Total artifact bytes written to storage",
    )
    .expect("metric creation failed")
});

pub static BYTES_DOWNLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cairn_bytes_downloaded_total",
        "Total artifact bytes served (by object size on hit)",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "cairn_artifact_upload_duration_seconds",
            "Time taken to stream an artifact into storage",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

// Auth metrics
pub static AUTH_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cairn_auth_rejections_total",
            "Requests rejected by token authorization, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(ARTIFACT_UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARTIFACT_DOWNLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_DOWNLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AUTH_REJECTIONS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_upload(outcome: &str) {
    ARTIFACT_UPLOADS.with_label_values(&[outcome]).inc();
}

pub fn record_download(outcome: &str) {
    ARTIFACT_DOWNLOADS.with_label_values(&[outcome]).inc();
}

pub fn record_auth_rejection(reason: &str) {
    AUTH_REJECTIONS.with_label_values(&[reason]).inc();
}
