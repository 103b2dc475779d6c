//! Sharing completed files and relaying processing status.

use crate::auth::RequestContext;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use upsync_core::models::{AccessType, ProcessingStatus, ShareTarget};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareFileRequest {
    pub target: ShareTarget,
    #[serde(default)]
    pub access_type: AccessType,
}

#[derive(Debug, Deserialize)]
pub struct FileProcessedRequest {
    pub status: ProcessingStatus,
}

#[derive(Debug, Serialize)]
pub struct FileProcessedResponse {
    pub delivered: usize,
}

pub async fn share_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<ShareFileRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    state.owned_file(&ctx, file_id)?;
    let association = state
        .engine
        .share_file(file_id, request.target, request.access_type, ctx.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(association)))
}

/// Called by the processing pipeline once it has handled a completed file.
pub async fn file_processed(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<FileProcessedRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    state.owned_file(&ctx, file_id)?;
    let delivered = state.engine.notify_file_processed(file_id, request.status)?;
    Ok(Json(FileProcessedResponse { delivered }))
}
