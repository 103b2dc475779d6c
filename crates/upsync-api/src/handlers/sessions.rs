//! Upload session handlers.

use crate::auth::RequestContext;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use upsync_core::models::FileManifestEntry;
use upsync_core::AppError;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub files: Vec<FileManifestEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSessionRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub session_ids: Vec<Uuid>,
}

pub async fn create_session(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let snapshot = state
        .engine
        .initiate(ctx.user_id, ctx.company_id, name, request.files)
        .await?;

    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn get_session(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = state.owned_session(&ctx, session_id).await?;
    let snapshot = state.engine.get_session(session_id).await?;
    Ok(Json(snapshot))
}

/// Live sessions of the caller's company.
pub async fn list_sessions(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_ids = state.engine.company_sessions(ctx.company_id).await;
    Ok(Json(SessionListResponse { session_ids }))
}

pub async fn add_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    ValidatedJson(entry): ValidatedJson<FileManifestEntry>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = state.owned_session(&ctx, session_id).await?;
    let row = state.engine.add_file(session_id, entry).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn cancel_session(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = state.owned_session(&ctx, session_id).await?;
    // The body is optional; an empty one cancels without a reason.
    let request: CancelSessionRequest = if body.is_empty() {
        CancelSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid request body: {}", e)))?
    };
    let reason = request.reason.filter(|r| !r.trim().is_empty());
    let session = state.engine.cancel(session_id, reason).await?;

    tracing::info!(
        session_id = %session_id,
        user_id = %ctx.user_id,
        "Upload session cancelled by client"
    );
    Ok(Json(session))
}
