//! Route configuration.

use crate::auth::{auth_middleware, trace_middleware};
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Authorization runs before any handler so unauthorized requests never
    // reach key resolution or storage.
    let artifact_routes = Router::new()
        .route(
            "/v8/artifacts/{hash}",
            get(handlers::get_artifact).put(handlers::put_artifact),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Liveness probe (intentionally unauthenticated for load balancers/k8s probes)
    let mut router = Router::new()
        .merge(artifact_routes)
        .route("/_/status", get(handlers::get_status));

    // SECURITY: when enabled, /metrics must be network-restricted to the
    // Prometheus scraper.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
