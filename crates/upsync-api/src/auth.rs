//! Caller identity
//!
//! Authentication happens upstream; the gateway forwards the authenticated user and
//! company as `x-user-id` / `x-company-id` headers.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::error::ErrorResponse;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const COMPANY_ID_HEADER: &str = "x-company-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub company_id: Uuid,
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_uuid(&parts.headers, USER_ID_HEADER);
        let company_id = header_uuid(&parts.headers, COMPANY_ID_HEADER);
        match (user_id, company_id) {
            (Some(user_id), Some(company_id)) => Ok(RequestContext {
                user_id,
                company_id,
            }),
            _ => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    suggested_action: Some(format!(
                        "Send {} and {} headers",
                        USER_ID_HEADER, COMPANY_ID_HEADER
                    )),
                    ..ErrorResponse::new("Missing caller identity", "MISSING_IDENTITY")
                }),
            )),
        }
    }
}
