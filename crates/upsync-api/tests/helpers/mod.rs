//! Test server over an in-memory engine and identity helpers.
#![allow(dead_code)]

use axum_test::{TestRequest, TestServer};
use std::sync::Arc;
use upsync_api::AppState;
use upsync_core::{BaseConfig, Config, EngineConfig};
use upsync_engine::UploadEngine;
use uuid::Uuid;

pub const QUOTA_LIMIT: u64 = 2_000_000;

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
}

#[derive(Debug, Clone, Copy)]
pub struct TestUser {
    pub user_id: Uuid,
    pub company_id: Uuid,
}

impl TestUser {
    pub fn new() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
        }
    }

    /// Another user of the same company.
    pub fn colleague(&self) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            company_id: self.company_id,
        }
    }

    pub fn sign(&self, request: TestRequest) -> TestRequest {
        request
            .add_header("x-user-id", self.user_id.to_string())
            .add_header("x-company-id", self.company_id.to_string())
    }
}

pub fn create_test_config() -> Config {
    Config {
        base: BaseConfig {
            server_port: 3000,
            cors_origins: vec!["*".to_string()],
            environment: "test".to_string(),
            database_url: None,
            db_max_connections: 5,
            db_timeout_seconds: 30,
            log_format: "text".to_string(),
            max_chunk_body_bytes: 8 * 1024 * 1024,
        },
        engine: EngineConfig {
            default_storage_limit_bytes: QUOTA_LIMIT,
            stale_session_reap_interval_secs: 0,
            ..EngineConfig::default()
        },
    }
}

pub async fn setup_test_app() -> TestApp {
    let config = create_test_config();
    let engine = Arc::new(UploadEngine::in_memory(config.engine.clone()));
    let (state, app) = upsync_api::setup::build_app(config, engine)
        .await
        .expect("Failed to build app");
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");
    TestApp { server, state }
}

/// Create a session and return its id.
pub async fn create_session(app: &TestApp, user: &TestUser, files: serde_json::Value) -> Uuid {
    let response = user
        .sign(app.server.post("/api/v0/upload-sessions"))
        .json(&serde_json::json!({ "name": "batch", "files": files }))
        .await;
    assert_eq!(response.status_code(), 201);
    let body: serde_json::Value = response.json();
    Uuid::parse_str(body["session"]["id"].as_str().expect("session id")).expect("uuid")
}

pub fn chunk_path(session_id: Uuid, file_index: u32, chunk_index: u32) -> String {
    format!(
        "/api/v0/upload-sessions/{}/files/{}/chunks/{}",
        session_id, file_index, chunk_index
    )
}
