//! Application state shared by all handlers.

use std::sync::Arc;

use upsync_core::{AppError, Config};
use upsync_engine::UploadEngine;
use uuid::Uuid;

use crate::auth::RequestContext;

pub struct AppState {
    pub config: Config,
    pub engine: Arc<UploadEngine>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<UploadEngine>) -> Self {
        Self { config, engine }
    }

    /// Resolve a session the caller's company owns. Other companies' sessions are
    /// reported as missing.
    pub async fn owned_session(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
    ) -> Result<Uuid, AppError> {
        let company_id = self.engine.session_company(session_id).await?;
        if company_id != ctx.company_id {
            return Err(AppError::SessionNotFound(session_id));
        }
        Ok(session_id)
    }

    /// Same rule for completed files.
    pub fn owned_file(
        &self,
        ctx: &RequestContext,
        file_id: Uuid,
    ) -> Result<upsync_engine::FileLocator, AppError> {
        let file = self.engine.file(file_id)?;
        if file.company_id != ctx.company_id {
            return Err(AppError::FileNotFound(file_id.to_string()));
        }
        Ok(file)
    }
}
