//! Chunk delivery and per-file completion.
//!
//! Chunk payloads are sent as the raw request body. The byte count is what the tracker
//! accounts; storing the payload is the object store's job.

use crate::auth::RequestContext;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use upsync_core::models::{SessionStatus, UploadProgress};
use upsync_core::AppError;
use upsync_engine::{ChunkDisposition, ChunkReceipt};
use uuid::Uuid;

pub const TOTAL_CHUNKS_HEADER: &str = "x-total-chunks";
pub const CHUNK_CHECKSUM_HEADER: &str = "x-chunk-checksum";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    /// `applied`, `buffered` or `duplicate`
    pub disposition: &'static str,
    /// Chunks applied by this request, buffered successors included
    pub applied_chunks: u32,
    pub file_completed: bool,
    pub progress: UploadProgress,
    pub session_status: SessionStatus,
}

impl From<ChunkReceipt> for ChunkResponse {
    fn from(receipt: ChunkReceipt) -> Self {
        let (disposition, applied_chunks, file_completed) = match receipt.disposition {
            ChunkDisposition::Applied { chunks, completed } => ("applied", chunks, completed),
            ChunkDisposition::Buffered => ("buffered", 0, false),
            ChunkDisposition::Duplicate => ("duplicate", 0, false),
        };
        Self {
            disposition,
            applied_chunks,
            file_completed,
            progress: receipt.progress,
            session_status: receipt.session_status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FailFileRequest {
    pub error: String,
}

fn total_chunks(headers: &HeaderMap) -> Result<u32, AppError> {
    let raw = headers
        .get(TOTAL_CHUNKS_HEADER)
        .ok_or_else(|| AppError::InvalidInput(format!("Missing {} header", TOTAL_CHUNKS_HEADER)))?;
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            AppError::InvalidInput(format!(
                "{} must be a positive integer",
                TOTAL_CHUNKS_HEADER
            ))
        })
}

pub async fn upload_chunk(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path((session_id, file_index, chunk_index)): Path<(Uuid, u32, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = state.owned_session(&ctx, session_id).await?;
    if body.is_empty() {
        return Err(AppError::InvalidInput("Chunk body cannot be empty".to_string()).into());
    }

    let total_chunks = total_chunks(&headers)?;
    let checksum = headers
        .get(CHUNK_CHECKSUM_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let receipt = state
        .engine
        .upload_chunk(
            session_id,
            file_index,
            chunk_index,
            total_chunks,
            &body,
            checksum,
        )
        .await?;

    Ok(Json(ChunkResponse::from(receipt)))
}

pub async fn complete_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path((session_id, file_index)): Path<(Uuid, u32)>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = state.owned_session(&ctx, session_id).await?;
    let row = state.engine.complete_file(session_id, file_index).await?;
    Ok(Json(row))
}

pub async fn fail_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path((session_id, file_index)): Path<(Uuid, u32)>,
    ValidatedJson(request): ValidatedJson<FailFileRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = state.owned_session(&ctx, session_id).await?;
    let error = request.error.trim();
    if error.is_empty() {
        return Err(AppError::InvalidInput("error cannot be empty".to_string()).into());
    }
    let row = state
        .engine
        .fail_file(session_id, file_index, error.to_string())
        .await?;
    Ok(Json(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_total_chunks_header() {
        let mut headers = HeaderMap::new();
        assert!(total_chunks(&headers).is_err());

        headers.insert(TOTAL_CHUNKS_HEADER, HeaderValue::from_static("0"));
        assert!(total_chunks(&headers).is_err());

        headers.insert(TOTAL_CHUNKS_HEADER, HeaderValue::from_static(" 12 "));
        assert_eq!(total_chunks(&headers).unwrap(), 12);
    }
}
