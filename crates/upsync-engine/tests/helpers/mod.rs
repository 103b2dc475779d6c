//! Test helpers: engines backed by the in-memory store, manifests and event draining.
#![allow(dead_code)]

use std::sync::Arc;

use upsync_core::models::{FileManifestEntry, SessionSnapshot};
use upsync_core::{EngineConfig, ServerEvent};
use upsync_engine::{ChunkReceipt, MemoryUploadStore, Subscription, UploadEngine};
use uuid::Uuid;

pub const QUOTA_LIMIT: u64 = 2_000_000;

/// Engine config for tests: small quota, no background reaper.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        default_storage_limit_bytes: QUOTA_LIMIT,
        stale_session_reap_interval_secs: 0,
        ..EngineConfig::default()
    }
}

pub fn setup_engine() -> (UploadEngine, Arc<MemoryUploadStore>) {
    setup_engine_with(test_config())
}

pub fn setup_engine_with(config: EngineConfig) -> (UploadEngine, Arc<MemoryUploadStore>) {
    let store = Arc::new(MemoryUploadStore::new());
    let engine = UploadEngine::new(config, store.clone());
    (engine, store)
}

pub fn file(name: &str, size: u64) -> FileManifestEntry {
    FileManifestEntry::new(name, size)
}

/// Owner and company ids for a fresh tenant.
pub fn tenant() -> (Uuid, Uuid) {
    (Uuid::new_v4(), Uuid::new_v4())
}

pub async fn initiate(
    engine: &UploadEngine,
    company_id: Uuid,
    manifest: Vec<FileManifestEntry>,
) -> SessionSnapshot {
    engine
        .initiate(Uuid::new_v4(), company_id, Some("batch".to_string()), manifest)
        .await
        .expect("initiate session")
}

/// Send `chunk_count` chunks of `chunk_size` bytes in order.
pub async fn upload_chunks(
    engine: &UploadEngine,
    session_id: Uuid,
    file_index: u32,
    chunk_size: u64,
    chunk_count: u32,
) -> Vec<ChunkReceipt> {
    let mut receipts = Vec::new();
    for chunk_index in 0..chunk_count {
        receipts.push(
            engine
                .record_chunk(session_id, file_index, chunk_index, chunk_size, chunk_count)
                .await
                .expect("record chunk"),
        );
    }
    receipts
}

/// Everything currently queued for a subscriber.
pub fn drain(subscription: &mut Subscription) -> Vec<Arc<ServerEvent>> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}

pub fn event_names(events: &[Arc<ServerEvent>]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}
