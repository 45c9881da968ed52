use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::triggers::{notify_subscribers, submit_progress};

/// Public read-only endpoints
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
}

/// Trigger endpoints, nested under `/api/v1` behind the API key check
pub fn trigger_routes() -> Router<AppState> {
    Router::new()
        .route("/progress", post(submit_progress))
        .route("/notify", post(notify_subscribers))
}
