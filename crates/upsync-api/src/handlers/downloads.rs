//! Download token issue and redemption.

use crate::auth::RequestContext;
use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use upsync_core::models::{DownloadToken, IssueTokenOptions};
use upsync_core::AppError;
use upsync_engine::FileLocator;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub max_downloads: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenResponse {
    pub token: String,
    pub file_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: u32,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub file: FileLocator,
}

fn parse_options(body: &Bytes, headers: &HeaderMap) -> Result<IssueTokenOptions, AppError> {
    let request: IssueTokenRequest = if body.is_empty() {
        IssueTokenRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid request body: {}", e)))?
    };

    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    Ok(IssueTokenOptions {
        ttl_secs: request.ttl_secs,
        max_downloads: request.max_downloads,
        ip_address,
        user_agent,
    })
}

fn issued(token: DownloadToken) -> (StatusCode, Json<IssueTokenResponse>) {
    let download_url = format!(
        "{}/downloads/{}",
        upsync_core::constants::API_PREFIX,
        token.token
    );
    tracing::debug!(file_id = %token.file_id, expires_at = %token.expires_at, "Download token issued");
    (
        StatusCode::CREATED,
        Json(IssueTokenResponse {
            file_id: token.file_id,
            expires_at: token.expires_at,
            max_downloads: token.max_downloads,
            download_url,
            token: token.token,
        }),
    )
}

pub async fn get_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let file = state.owned_file(&ctx, file_id)?;
    Ok(Json(file))
}

pub async fn issue_for_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    state.owned_file(&ctx, file_id)?;
    let options = parse_options(&body, &headers)?;
    let token = state
        .engine
        .issue_download_token(file_id, ctx.user_id, options)
        .await?;
    Ok(issued(token))
}

pub async fn issue_for_upload(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path((session_id, file_index)): Path<(Uuid, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = state.owned_session(&ctx, session_id).await?;
    let options = parse_options(&body, &headers)?;
    let token = state
        .engine
        .issue_download_token_for_upload(session_id, file_index, ctx.user_id, options)
        .await?;
    Ok(issued(token))
}

/// Public: possession of the token is the credential.
pub async fn redeem(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    let file = state.engine.redeem_download_token(&token).await?;
    Ok(Json(RedeemResponse { file }))
}
