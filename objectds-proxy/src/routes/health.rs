//! Health check and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::health::check_health;
use crate::state::AppState;

/// Health check endpoint
///
/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let instance = state.proxy.instance();
    let result = check_health(&instance).await;

    let status =
        if result.is_healthy() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": result.status,
            "message": result.message,
            "upstream": instance.settings.url,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Metrics endpoint with call statistics
///
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let instance = state.proxy.instance();

    Json(json!({
        "proxy": state.stats.snapshot(),
        "server": { "port": state.config.port },
        "instance": {
            "url": instance.settings.url,
            "name": instance.settings.name,
            "timeout_secs": instance.settings.timeout.as_secs(),
            "query_links": instance.settings.query_links.len()
        }
    }))
}

/// Prometheus metrics endpoint
///
/// GET /metrics/prometheus
pub async fn metrics_prometheus() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        crate::metrics::encode_metrics(),
    )
}

/// Live check (for Kubernetes)
///
/// GET /live
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}
