//! Health check handlers and response types.

use crate::state::AppState;
use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use upsync_core::constants::API_PREFIX;
use upsync_engine::EngineStats;

/// Run an async check with timeout; returns status string "healthy", "timeout", or "{prefix}: {error}".
async fn run_check<F, E>(timeout: Duration, f: F, error_prefix: &str) -> String
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, f).await {
        Ok(Ok(())) => "healthy".to_string(),
        Ok(Err(e)) => format!("{}: {}", error_prefix, e),
        Err(_) => "timeout".to_string(),
    }
}

#[derive(serde::Serialize)]
struct HealthCheckResponse {
    status: String,
    store: String,
    engine: EngineStats,
}

pub(super) fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(&format!("{}/health", API_PREFIX), get(health_check))
        .route(&format!("{}/health/live", API_PREFIX), get(liveness_check))
}

/// Liveness probe - process is running.
async fn liveness_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "alive" })),
    )
}

/// Store reachability plus engine counters.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    const TIMEOUT: Duration = Duration::from_secs(5);

    let engine = state.engine.clone();
    let store = run_check(TIMEOUT, async move { engine.ping_store().await }, "unhealthy").await;
    let healthy = store == "healthy";
    if !healthy {
        tracing::error!(store = %store, "Store health check failed");
    }

    let response = HealthCheckResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        store,
        engine: state.engine.stats().await,
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}
