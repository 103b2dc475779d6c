#[path = "helpers/mod.rs"]
mod helpers;

use bytes::Bytes;
use helpers::{chunk_path, create_session, setup_test_app, TestUser, QUOTA_LIMIT};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

#[tokio::test]
async fn test_missing_identity_is_rejected() {
    let app = setup_test_app().await;

    let response = app
        .server
        .post("/api/v0/upload-sessions")
        .json(&json!({ "files": [{ "fileName": "a.txt", "sizeBytes": 10 }] }))
        .await;

    assert_eq!(response.status_code(), 401);
    let body: Value = response.json();
    assert_eq!(body["code"], "MISSING_IDENTITY");
}

#[tokio::test]
async fn test_chunked_upload_download_flow() {
    let app = setup_test_app().await;
    let user = TestUser::new();
    let session_id = create_session(
        &app,
        &user,
        json!([{ "fileName": "notes.txt", "sizeBytes": 1000, "contentType": "text/plain" }]),
    )
    .await;

    let first = user
        .sign(app.server.put(&chunk_path(session_id, 0, 0)))
        .add_header("x-total-chunks", "2")
        .bytes(Bytes::from(vec![1u8; 600]))
        .await;
    assert_eq!(first.status_code(), 200);
    let body: Value = first.json();
    assert_eq!(body["disposition"], "applied");
    assert_eq!(body["fileCompleted"], false);
    assert_eq!(body["progress"]["bytesUploaded"], 600);
    assert_eq!(body["progress"]["progressPercentage"], 60);
    assert_eq!(body["sessionStatus"], "ACTIVE");

    let last = user
        .sign(app.server.put(&chunk_path(session_id, 0, 1)))
        .add_header("x-total-chunks", "2")
        .bytes(Bytes::from(vec![2u8; 400]))
        .await;
    assert_eq!(last.status_code(), 200);
    let body: Value = last.json();
    assert_eq!(body["fileCompleted"], true);
    assert_eq!(body["sessionStatus"], "COMPLETED");
    let file_id = body["progress"]["fileId"]
        .as_str()
        .expect("file id assigned")
        .to_string();

    let session = user
        .sign(app.server.get(&format!("/api/v0/upload-sessions/{}", session_id)))
        .await;
    assert_eq!(session.status_code(), 200);
    let body: Value = session.json();
    assert_eq!(body["session"]["status"], "COMPLETED");
    assert_eq!(body["session"]["uploadedBytes"], 1000);

    let file = user
        .sign(app.server.get(&format!("/api/v0/files/{}", file_id)))
        .await;
    assert_eq!(file.status_code(), 200);
    let body: Value = file.json();
    assert_eq!(body["fileName"], "notes.txt");
    assert_eq!(body["sizeBytes"], 1000);

    let issued = user
        .sign(app.server.post(&format!(
            "/api/v0/upload-sessions/{}/files/0/download-tokens",
            session_id
        )))
        .add_header("user-agent", "upsync-tests")
        .json(&json!({ "maxDownloads": 1 }))
        .await;
    assert_eq!(issued.status_code(), 201);
    let body: Value = issued.json();
    assert_eq!(body["fileId"], file_id.as_str());
    assert_eq!(body["maxDownloads"], 1);
    let token = body["token"].as_str().expect("token").to_string();
    assert_eq!(
        body["downloadUrl"],
        format!("/api/v0/downloads/{}", token).as_str()
    );

    // Redemption needs no identity headers
    let redeemed = app
        .server
        .get(&format!("/api/v0/downloads/{}", token))
        .await;
    assert_eq!(redeemed.status_code(), 200);
    let body: Value = redeemed.json();
    assert_eq!(body["file"]["fileId"], file_id.as_str());

    let again = app
        .server
        .get(&format!("/api/v0/downloads/{}", token))
        .await;
    assert_eq!(again.status_code(), 410);
    let body: Value = again.json();
    assert_eq!(body["code"], "TOKEN_EXHAUSTED");

    let unknown = app.server.get("/api/v0/downloads/not-a-token").await;
    assert_eq!(unknown.status_code(), 404);

    let quota = user.sign(app.server.get("/api/v0/quota")).await;
    assert_eq!(quota.status_code(), 200);
    let body: Value = quota.json();
    assert_eq!(body["quota"]["storageUsedBytes"], 1000);
    assert_eq!(body["pendingBytes"], 0);
    assert_eq!(body["availableBytes"], QUOTA_LIMIT - 1000);
}

#[tokio::test]
async fn test_quota_exceeded_returns_413() {
    let app = setup_test_app().await;
    let user = TestUser::new();

    let response = user
        .sign(app.server.post("/api/v0/upload-sessions"))
        .json(&json!({ "files": [{ "fileName": "big.iso", "sizeBytes": QUOTA_LIMIT + 1 }] }))
        .await;

    assert_eq!(response.status_code(), 413);
    let body: Value = response.json();
    assert_eq!(body["code"], "QUOTA_EXCEEDED");
    assert_eq!(body["recoverable"], false);
}

#[tokio::test]
async fn test_sessions_are_scoped_to_company() {
    let app = setup_test_app().await;
    let owner = TestUser::new();
    let outsider = TestUser::new();
    let session_id = create_session(
        &app,
        &owner,
        json!([{ "fileName": "a.bin", "sizeBytes": 10 }]),
    )
    .await;

    let response = outsider
        .sign(app.server.get(&format!("/api/v0/upload-sessions/{}", session_id)))
        .await;
    assert_eq!(response.status_code(), 404);

    let colleague = owner.colleague();
    let response = colleague
        .sign(app.server.get(&format!("/api/v0/upload-sessions/{}", session_id)))
        .await;
    assert_eq!(response.status_code(), 200);

    let listed = colleague.sign(app.server.get("/api/v0/upload-sessions")).await;
    let body: Value = listed.json();
    assert_eq!(body["sessionIds"], json!([session_id]));
}

#[tokio::test]
async fn test_chunk_request_validation() {
    let app = setup_test_app().await;
    let user = TestUser::new();
    let session_id = create_session(
        &app,
        &user,
        json!([{ "fileName": "a.bin", "sizeBytes": 8 }]),
    )
    .await;

    let missing_header = user
        .sign(app.server.put(&chunk_path(session_id, 0, 0)))
        .bytes(Bytes::from_static(b"12345678"))
        .await;
    assert_eq!(missing_header.status_code(), 400);

    let mismatch = user
        .sign(app.server.put(&chunk_path(session_id, 0, 0)))
        .add_header("x-total-chunks", "2")
        .add_header("x-chunk-checksum", "deadbeef")
        .bytes(Bytes::from_static(b"1234"))
        .await;
    assert_eq!(mismatch.status_code(), 422);
    let body: Value = mismatch.json();
    assert_eq!(body["code"], "CHECKSUM_MISMATCH");
    assert_eq!(body["recoverable"], true);

    let checksum = hex::encode(Sha256::digest(b"1234"));
    let accepted = user
        .sign(app.server.put(&chunk_path(session_id, 0, 0)))
        .add_header("x-total-chunks", "2")
        .add_header("x-chunk-checksum", checksum)
        .bytes(Bytes::from_static(b"1234"))
        .await;
    assert_eq!(accepted.status_code(), 200);
    let body: Value = accepted.json();
    assert_eq!(body["disposition"], "applied");
    assert_eq!(body["progress"]["bytesUploaded"], 4);

    let duplicate = user
        .sign(app.server.put(&chunk_path(session_id, 0, 0)))
        .add_header("x-total-chunks", "2")
        .bytes(Bytes::from_static(b"1234"))
        .await;
    assert_eq!(duplicate.status_code(), 200);
    let body: Value = duplicate.json();
    assert_eq!(body["disposition"], "duplicate");
    assert_eq!(body["progress"]["bytesUploaded"], 4);

    let last = user
        .sign(app.server.put(&chunk_path(session_id, 0, 1)))
        .add_header("x-total-chunks", "2")
        .bytes(Bytes::from_static(b"5678"))
        .await;
    assert_eq!(last.status_code(), 200);
    let body: Value = last.json();
    assert_eq!(body["fileCompleted"], true);

    let after_completion = user
        .sign(app.server.put(&chunk_path(session_id, 0, 1)))
        .add_header("x-total-chunks", "2")
        .bytes(Bytes::from_static(b"5678"))
        .await;
    assert_eq!(after_completion.status_code(), 409);
}

#[tokio::test]
async fn test_cancel_and_fail_file() {
    let app = setup_test_app().await;
    let user = TestUser::new();
    let session_id = create_session(
        &app,
        &user,
        json!([
            { "fileName": "a.bin", "sizeBytes": 100 },
            { "fileName": "b.bin", "sizeBytes": 100 }
        ]),
    )
    .await;

    let failed = user
        .sign(app.server.post(&format!(
            "/api/v0/upload-sessions/{}/files/0/fail",
            session_id
        )))
        .json(&json!({ "error": "client gave up" }))
        .await;
    assert_eq!(failed.status_code(), 200);
    let body: Value = failed.json();
    assert_eq!(body["status"], "FAILED");
    assert_eq!(body["errorMessage"], "client gave up");

    let cancelled = user
        .sign(app.server.post(&format!("/api/v0/upload-sessions/{}/cancel", session_id)))
        .await;
    assert_eq!(cancelled.status_code(), 200);
    let body: Value = cancelled.json();
    assert_eq!(body["status"], "CANCELLED");

    let again = user
        .sign(app.server.post(&format!("/api/v0/upload-sessions/{}/cancel", session_id)))
        .json(&json!({ "reason": "twice" }))
        .await;
    assert_eq!(again.status_code(), 409);

    let quota = user.sign(app.server.get("/api/v0/quota")).await;
    let body: Value = quota.json();
    assert_eq!(body["pendingBytes"], 0);
    assert_eq!(body["availableBytes"], QUOTA_LIMIT);
}

#[tokio::test]
async fn test_share_requires_completed_file() {
    let app = setup_test_app().await;
    let user = TestUser::new();
    let chatroom = uuid::Uuid::new_v4();

    let response = user
        .sign(app.server.post(&format!(
            "/api/v0/files/{}/shares",
            uuid::Uuid::new_v4()
        )))
        .json(&json!({ "target": { "type": "chatroom", "id": chatroom } }))
        .await;
    assert_eq!(response.status_code(), 404);
    let body: Value = response.json();
    assert_eq!(body["code"], "FILE_NOT_FOUND");
}

#[tokio::test]
async fn test_health_reports_engine_stats() {
    let app = setup_test_app().await;

    let response = app.server.get("/api/v0/health").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "healthy");
    assert_eq!(body["engine"]["liveSessions"], 0);

    let live = app.server.get("/api/v0/health/live").await;
    assert_eq!(live.status_code(), 200);
}
