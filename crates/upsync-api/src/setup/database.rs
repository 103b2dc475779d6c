//! Store selection

use anyhow::{Context, Result};
use std::sync::Arc;
use upsync_core::{Config, UploadStore};
use upsync_db::PgUploadStore;
use upsync_engine::MemoryUploadStore;

/// Postgres when `DATABASE_URL` is set, otherwise an in-process store that loses its
/// contents on restart.
pub async fn setup_store(config: &Config) -> Result<Arc<dyn UploadStore>> {
    let Some(url) = config.database_url() else {
        tracing::warn!("DATABASE_URL not set, using in-memory store");
        return Ok(Arc::new(MemoryUploadStore::new()));
    };

    let pool = upsync_db::connect(
        url,
        config.base.db_max_connections,
        config.base.db_timeout_seconds,
    )
    .await?;
    upsync_db::run_migrations(&pool)
        .await
        .context("Database setup failed")?;

    Ok(Arc::new(PgUploadStore::new(pool)))
}
