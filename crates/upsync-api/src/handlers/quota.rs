use crate::auth::RequestContext;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use upsync_core::models::QuotaSnapshot;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    #[serde(flatten)]
    pub snapshot: QuotaSnapshot,
    pub available_bytes: u64,
}

impl From<QuotaSnapshot> for QuotaResponse {
    fn from(snapshot: QuotaSnapshot) -> Self {
        Self {
            available_bytes: snapshot.available(),
            snapshot,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetQuotaRequest {
    pub storage_limit_bytes: u64,
}

pub async fn get_quota(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpAppError> {
    let snapshot = state.engine.quota(ctx.company_id).await?;
    Ok(Json(QuotaResponse::from(snapshot)))
}

pub async fn set_quota(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<SetQuotaRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    state
        .engine
        .set_quota_limit(ctx.company_id, request.storage_limit_bytes)
        .await?;
    let snapshot = state.engine.quota(ctx.company_id).await?;

    tracing::info!(
        company_id = %ctx.company_id,
        limit = request.storage_limit_bytes,
        "Storage limit updated"
    );
    Ok(Json(QuotaResponse::from(snapshot)))
}
