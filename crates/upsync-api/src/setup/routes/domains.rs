//! Route groups for upload sessions, completed files and the realtime socket.

use crate::handlers;
use crate::state::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use upsync_core::constants::API_PREFIX;

pub fn session_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/upload-sessions", API_PREFIX),
            post(handlers::sessions::create_session).get(handlers::sessions::list_sessions),
        )
        .route(
            &format!("{}/upload-sessions/{{id}}", API_PREFIX),
            get(handlers::sessions::get_session),
        )
        .route(
            &format!("{}/upload-sessions/{{id}}/files", API_PREFIX),
            post(handlers::sessions::add_file),
        )
        .route(
            &format!("{}/upload-sessions/{{id}}/cancel", API_PREFIX),
            post(handlers::sessions::cancel_session),
        )
        .route(
            &format!(
                "{}/upload-sessions/{{id}}/files/{{idx}}/chunks/{{chunk}}",
                API_PREFIX
            ),
            put(handlers::chunks::upload_chunk),
        )
        .route(
            &format!("{}/upload-sessions/{{id}}/files/{{idx}}/complete", API_PREFIX),
            post(handlers::chunks::complete_file),
        )
        .route(
            &format!("{}/upload-sessions/{{id}}/files/{{idx}}/fail", API_PREFIX),
            post(handlers::chunks::fail_file),
        )
        .route(
            &format!(
                "{}/upload-sessions/{{id}}/files/{{idx}}/download-tokens",
                API_PREFIX
            ),
            post(handlers::downloads::issue_for_upload),
        )
}

pub fn file_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/files/{{file_id}}", API_PREFIX),
            get(handlers::downloads::get_file),
        )
        .route(
            &format!("{}/files/{{file_id}}/download-tokens", API_PREFIX),
            post(handlers::downloads::issue_for_file),
        )
        .route(
            &format!("{}/files/{{file_id}}/shares", API_PREFIX),
            post(handlers::shares::share_file),
        )
        .route(
            &format!("{}/files/{{file_id}}/processed", API_PREFIX),
            post(handlers::shares::file_processed),
        )
        .route(
            &format!("{}/downloads/{{token}}", API_PREFIX),
            get(handlers::downloads::redeem),
        )
        .route(
            &format!("{}/quota", API_PREFIX),
            get(handlers::quota::get_quota).put(handlers::quota::set_quota),
        )
}

pub fn realtime_routes() -> Router<Arc<AppState>> {
    Router::new().route(
        &format!("{}/ws", API_PREFIX),
        get(handlers::ws::websocket_handler),
    )
}
