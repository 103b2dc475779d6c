//! `UploadEngine` facade
//!
//! Entry point used by the API layer. Wires the quota ledger, session registry, token
//! issuer, broadcaster and reaper together and exposes the session control operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use upsync_core::models::{
    AccessType, DownloadToken, FileAssociation, FileManifestEntry, IssueTokenOptions,
    ProcessingStatus, ProgressStatus, QuotaSnapshot, SessionSnapshot, ShareTarget,
    StorageQuota, UploadProgress, UploadSession,
};
use upsync_core::{AppError, EngineConfig, Room, RoomType, ServerEvent, UploadStore};
use uuid::Uuid;

use crate::broadcast::{Broadcaster, ConnectionHandle, RoomStats, Subscription};
use crate::context::EngineContext;
use crate::memory_store::MemoryUploadStore;
use crate::reaper::{self, ReapReport, ReaperHandle};
use crate::registry::{FileLocator, SessionRegistry};
use crate::session::ChunkReceipt;
use crate::tokens::TokenIssuer;
use crate::tracker::verify_checksum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub live_sessions: usize,
    pub completed_files: usize,
    pub download_tokens: usize,
    pub quota_companies: usize,
    pub realtime: RoomStats,
}

pub struct UploadEngine {
    ctx: Arc<EngineContext>,
    registry: Arc<SessionRegistry>,
    tokens: Arc<TokenIssuer>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl UploadEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn UploadStore>) -> Self {
        let tokens = Arc::new(TokenIssuer::new(&config, store.clone()));
        let ctx = Arc::new(EngineContext::new(config, store));
        let registry = Arc::new(SessionRegistry::new(ctx.clone()));
        Self {
            ctx,
            registry,
            tokens,
            reaper: Mutex::new(None),
        }
    }

    /// Engine backed by `MemoryUploadStore`
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(MemoryUploadStore::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.ctx.broadcaster.clone()
    }

    pub fn store(&self) -> Arc<dyn UploadStore> {
        self.ctx.store.clone()
    }

    // ---- session control ----

    #[instrument(skip(self, manifest), fields(files = manifest.len()))]
    pub async fn initiate(
        &self,
        owner_user_id: Uuid,
        company_id: Uuid,
        name: Option<String>,
        manifest: Vec<FileManifestEntry>,
    ) -> Result<SessionSnapshot, AppError> {
        self.registry
            .create_session(owner_user_id, company_id, name, manifest)
            .await
    }

    /// Account for a chunk of `bytes` that has already been handed to storage.
    #[instrument(skip(self))]
    pub async fn record_chunk(
        &self,
        session_id: Uuid,
        file_index: u32,
        chunk_index: u32,
        bytes: u64,
        total_chunks: u32,
    ) -> Result<ChunkReceipt, AppError> {
        self.registry
            .get(session_id)
            .await?
            .record_chunk(file_index, chunk_index, bytes, total_chunks)
            .await
    }

    /// Verify an optional SHA-256 hex checksum of the payload, then record it.
    #[instrument(skip(self, data, checksum), fields(bytes = data.len()))]
    pub async fn upload_chunk(
        &self,
        session_id: Uuid,
        file_index: u32,
        chunk_index: u32,
        total_chunks: u32,
        data: &[u8],
        checksum: Option<&str>,
    ) -> Result<ChunkReceipt, AppError> {
        let handle = self.registry.get(session_id).await?;
        // A closed session answers with its terminal error instead of a retryable mismatch.
        if let (Some(expected), false) = (checksum, handle.is_closed()) {
            verify_checksum(chunk_index, data, expected)?;
        }
        handle
            .record_chunk(file_index, chunk_index, data.len() as u64, total_chunks)
            .await
    }

    #[instrument(skip(self))]
    pub async fn complete_file(
        &self,
        session_id: Uuid,
        file_index: u32,
    ) -> Result<UploadProgress, AppError> {
        self.registry
            .get(session_id)
            .await?
            .complete_file(file_index)
            .await
    }

    /// Mark one file as failed, e.g. when the client abandons it.
    #[instrument(skip(self, error))]
    pub async fn fail_file(
        &self,
        session_id: Uuid,
        file_index: u32,
        error: impl Into<String>,
    ) -> Result<UploadProgress, AppError> {
        self.registry
            .get(session_id)
            .await?
            .fail_file(file_index, error.into())
            .await
    }

    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        session_id: Uuid,
        reason: Option<String>,
    ) -> Result<UploadSession, AppError> {
        self.registry.cancel_session(session_id, reason).await
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionSnapshot, AppError> {
        self.registry.get_session(session_id).await
    }

    #[instrument(skip(self, entry), fields(size = entry.size_bytes))]
    pub async fn add_file(
        &self,
        session_id: Uuid,
        entry: FileManifestEntry,
    ) -> Result<UploadProgress, AppError> {
        self.registry.add_file(session_id, entry).await
    }

    pub async fn company_sessions(&self, company_id: Uuid) -> Vec<Uuid> {
        self.registry.sessions_for_company(company_id).await
    }

    /// Company owning a live session, without a round trip to its actor.
    pub async fn session_company(&self, session_id: Uuid) -> Result<Uuid, AppError> {
        Ok(self.registry.get(session_id).await?.company_id)
    }

    /// Fires when the session reaches a terminal state.
    pub async fn closed_token(&self, session_id: Uuid) -> Result<CancellationToken, AppError> {
        Ok(self.registry.get(session_id).await?.closed_token())
    }

    // ---- files and downloads ----

    pub fn file(&self, file_id: Uuid) -> Result<FileLocator, AppError> {
        self.ctx
            .files
            .get(&file_id)
            .ok_or_else(|| AppError::FileNotFound(file_id.to_string()))
    }

    #[instrument(skip(self, options))]
    pub async fn issue_download_token(
        &self,
        file_id: Uuid,
        user_id: Uuid,
        options: IssueTokenOptions,
    ) -> Result<DownloadToken, AppError> {
        self.tokens
            .issue(&self.ctx.files, file_id, user_id, options)
            .await
    }

    /// Issue a token for a file addressed by its position in a session.
    pub async fn issue_download_token_for_upload(
        &self,
        session_id: Uuid,
        file_index: u32,
        user_id: Uuid,
        options: IssueTokenOptions,
    ) -> Result<DownloadToken, AppError> {
        let snapshot = self.get_session(session_id).await?;
        let row = snapshot
            .files
            .get(file_index as usize)
            .ok_or_else(|| AppError::FileNotFound(format!("{}#{}", session_id, file_index)))?;
        match (row.status, row.file_id) {
            (ProgressStatus::Completed, Some(file_id)) => {
                self.issue_download_token(file_id, user_id, options).await
            }
            _ => Err(AppError::FileNotCompleted(row.id)),
        }
    }

    /// Consume one download and return the file it grants.
    #[instrument(skip(self, token))]
    pub async fn redeem_download_token(&self, token: &str) -> Result<FileLocator, AppError> {
        let file_id = self.tokens.redeem(token).await?;
        self.file(file_id)
    }

    pub async fn inspect_download_token(&self, token: &str) -> Result<DownloadToken, AppError> {
        self.tokens.inspect(token).await
    }

    /// Link a completed file to a chatroom or thread and announce it there.
    #[instrument(skip(self))]
    pub async fn share_file(
        &self,
        file_id: Uuid,
        target: ShareTarget,
        access_type: AccessType,
        shared_by: Uuid,
    ) -> Result<FileAssociation, AppError> {
        self.file(file_id)?;
        let association = FileAssociation::new(file_id, target, access_type, shared_by, Utc::now());
        self.ctx.store.save_association(&association).await?;

        let delivered = self
            .ctx
            .broadcaster
            .publish(Room::from(target), ServerEvent::shared(&association));
        info!(
            file_id = %file_id,
            association_id = %association.id,
            access_type = %access_type,
            delivered = delivered,
            "File shared"
        );
        Ok(association)
    }

    /// Relay a downstream processing status for a completed file.
    pub fn notify_file_processed(
        &self,
        file_id: Uuid,
        status: ProcessingStatus,
    ) -> Result<usize, AppError> {
        let file = self.file(file_id)?;
        let event = ServerEvent::processed(file_id, status);
        let broadcaster = &self.ctx.broadcaster;
        let delivered = broadcaster.publish(Room::upload_session(file.session_id), event.clone())
            + broadcaster.publish(Room::company(file.company_id), event);
        debug!(file_id = %file_id, status = %status, delivered = delivered, "File processed event");
        Ok(delivered)
    }

    // ---- realtime ----

    pub fn connect(&self) -> (ConnectionHandle, Subscription) {
        self.ctx.broadcaster.connect()
    }

    /// Join a room. Upload session rooms get an acknowledgement and the current session
    /// state before any further live event; other rooms get the acknowledgement only.
    pub async fn join_room(
        &self,
        room: Room,
        connection: ConnectionHandle,
    ) -> Result<bool, AppError> {
        match room.room_type {
            RoomType::UploadSession => {
                self.registry
                    .get(room.id)
                    .await?
                    .join_room(connection)
                    .await
            }
            RoomType::Company | RoomType::Chatroom | RoomType::Thread => {
                let broadcaster = &self.ctx.broadcaster;
                if !broadcaster.send_to(&connection, ServerEvent::room_joined(room)) {
                    return Ok(false);
                }
                Ok(broadcaster.subscribe(room, &connection))
            }
        }
    }

    pub async fn join_session_room(
        &self,
        session_id: Uuid,
        connection: ConnectionHandle,
    ) -> Result<bool, AppError> {
        self.join_room(Room::upload_session(session_id), connection)
            .await
    }

    pub fn leave_room(&self, room: Room, connection: &ConnectionHandle) -> bool {
        let broadcaster = &self.ctx.broadcaster;
        let left = broadcaster.unsubscribe(room, connection);
        if left {
            broadcaster.send_to(connection, ServerEvent::room_left(room));
        }
        left
    }

    pub fn disconnect(&self, connection: &ConnectionHandle) {
        self.ctx.broadcaster.disconnect(connection);
    }

    // ---- quota ----

    pub async fn quota(&self, company_id: Uuid) -> Result<QuotaSnapshot, AppError> {
        self.ctx.quota.snapshot(company_id).await
    }

    pub async fn set_quota_limit(
        &self,
        company_id: Uuid,
        limit: u64,
    ) -> Result<StorageQuota, AppError> {
        self.ctx.quota.set_limit(company_id, limit).await
    }

    // ---- lifecycle ----

    /// Start the periodic reaper if configured. Calling it twice keeps the first one.
    pub async fn start_reaper(&self) {
        let mut slot = self.reaper.lock().await;
        if slot.is_some() {
            return;
        }
        *slot = reaper::spawn_reaper(
            self.registry.clone(),
            self.tokens.clone(),
            self.ctx.config.clone(),
        );
        if slot.is_some() {
            info!(
                interval_secs = self.ctx.config.stale_session_reap_interval_secs,
                "Stale session reaper started"
            );
        }
    }

    pub async fn reap_once(&self, now: DateTime<Utc>) -> ReapReport {
        reaper::reap_once(&self.registry, &self.tokens, &self.ctx.config, now).await
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            live_sessions: self.registry.len().await,
            completed_files: self.ctx.files.len(),
            download_tokens: self.tokens.len().await,
            quota_companies: self.ctx.quota.company_count(),
            realtime: self.ctx.broadcaster.room_stats(),
        }
    }

    /// Health probe against the store.
    pub async fn ping_store(&self) -> Result<(), AppError> {
        self.ctx.store.ping().await
    }

    pub async fn shutdown(&self) {
        if let Some(reaper) = self.reaper.lock().await.take() {
            reaper.shutdown().await;
        }
        for handle in self.registry.handles().await {
            handle.shutdown().await;
        }
        info!("Upload engine stopped");
    }
}
