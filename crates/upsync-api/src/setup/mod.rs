//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;

use crate::state::AppState;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use upsync_core::Config;
use upsync_engine::UploadEngine;

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, Router)> {
    // Fail fast on misconfiguration
    config.validate().context("Configuration validation failed")?;

    crate::telemetry::init_telemetry(config.json_logs())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = %config.base.environment,
        "Configuration loaded and validated successfully"
    );

    let store = database::setup_store(&config).await?;
    let engine = Arc::new(UploadEngine::new(config.engine.clone(), store));
    engine.start_reaper().await;

    build_app(config, engine).await
}

/// State and router around an existing engine.
pub async fn build_app(config: Config, engine: Arc<UploadEngine>) -> Result<(Arc<AppState>, Router)> {
    let state = Arc::new(AppState::new(config.clone(), engine));
    let router = routes::setup_routes(&config, state.clone()).await?;
    Ok((state, router))
}
