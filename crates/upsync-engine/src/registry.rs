//! Upload Session Registry
//!
//! Live sessions are kept in an arena keyed by generational slot, with an id index and a
//! per-company index on the side. Completed files are indexed by file id so the token
//! issuer can resolve them after their session has been evicted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use upsync_core::constants::MAX_FILE_NAME_LEN;
use upsync_core::models::{
    chunk_count, manifest_total_bytes, FileManifestEntry, SessionSnapshot, UploadProgress,
    UploadSession,
};
use upsync_core::{AppError, Room, ServerEvent};
use uuid::Uuid;

use crate::arena::{Arena, SlotId};
use crate::context::EngineContext;
use crate::session::SessionHandle;

/// Where a completed file came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLocator {
    pub file_id: Uuid,
    pub session_id: Uuid,
    pub file_index: u32,
    pub company_id: Uuid,
    pub owner_user_id: Uuid,
    pub file_name: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Completed files by file id.
#[derive(Default)]
pub struct FileIndex {
    files: DashMap<Uuid, FileLocator>,
}

impl FileIndex {
    pub fn insert(&self, locator: FileLocator) {
        self.files.insert(locator.file_id, locator);
    }

    pub fn get(&self, file_id: &Uuid) -> Option<FileLocator> {
        self.files.get(file_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Drop locators of files completed before `cutoff`. Returns how many were dropped.
    pub fn prune_completed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.files.len();
        self.files.retain(|_, locator| locator.completed_at >= cutoff);
        before.saturating_sub(self.files.len())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    sessions: Arena<SessionHandle>,
    by_id: HashMap<Uuid, SlotId>,
    by_company: HashMap<Uuid, HashSet<Uuid>>,
}

pub struct SessionRegistry {
    ctx: Arc<EngineContext>,
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Validate the manifest, reserve its full size, then create and register the session.
    ///
    /// Nothing is created when validation or the reservation fails.
    pub async fn create_session(
        &self,
        owner_user_id: Uuid,
        company_id: Uuid,
        name: Option<String>,
        manifest: Vec<FileManifestEntry>,
    ) -> Result<SessionSnapshot, AppError> {
        let config = &self.ctx.config;
        let total_bytes = manifest_total_bytes(&manifest, config.max_files_per_session)?;
        let name = normalize_name(name)?;

        let reservation = self.ctx.quota.reserve(company_id, total_bytes).await?;

        let now = Utc::now();
        let session = UploadSession::new(
            owner_user_id,
            company_id,
            name,
            manifest.len() as u32,
            total_bytes,
            now,
        );
        let rows: Vec<UploadProgress> = manifest
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                UploadProgress::pending(
                    session.id,
                    index as u32,
                    owner_user_id,
                    entry,
                    chunk_count(entry.size_bytes, config.default_chunk_size_bytes),
                    now,
                )
            })
            .collect();

        self.ctx.persist_session(&session).await;
        for row in &rows {
            self.ctx.persist_progress(row).await;
        }

        let handle =
            SessionHandle::spawn(self.ctx.clone(), session.clone(), rows.clone(), reservation);
        {
            let mut state = self.state.write().await;
            let slot = state.sessions.insert(handle);
            state.by_id.insert(session.id, slot);
            state
                .by_company
                .entry(company_id)
                .or_default()
                .insert(session.id);
        }

        info!(
            session_id = %session.id,
            company_id = %company_id,
            total_files = session.total_files,
            total_bytes = total_bytes,
            "Upload session created"
        );

        self.ctx.broadcaster.publish(
            Room::company(company_id),
            ServerEvent::session_updated(&session),
        );

        Ok(SessionSnapshot {
            session,
            files: rows,
        })
    }

    /// Handle of a live session.
    pub async fn get(&self, session_id: Uuid) -> Result<SessionHandle, AppError> {
        let state = self.state.read().await;
        state
            .by_id
            .get(&session_id)
            .and_then(|slot| state.sessions.get(*slot))
            .cloned()
            .ok_or(AppError::SessionNotFound(session_id))
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionSnapshot, AppError> {
        self.get(session_id).await?.snapshot().await
    }

    pub async fn cancel_session(
        &self,
        session_id: Uuid,
        reason: Option<String>,
    ) -> Result<UploadSession, AppError> {
        self.get(session_id).await?.cancel(reason).await
    }

    pub async fn add_file(
        &self,
        session_id: Uuid,
        entry: FileManifestEntry,
    ) -> Result<UploadProgress, AppError> {
        self.get(session_id).await?.add_file(entry).await
    }

    /// Ids of the live sessions of a company.
    pub async fn sessions_for_company(&self, company_id: Uuid) -> Vec<Uuid> {
        let state = self.state.read().await;
        state
            .by_company
            .get(&company_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn handles(&self) -> Vec<SessionHandle> {
        let state = self.state.read().await;
        state.sessions.iter().map(|(_, h)| h.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub fn files(&self) -> &FileIndex {
        &self.ctx.files
    }

    /// Drop a session from the registry and stop its actor. Persisted rows are untouched.
    pub async fn evict(&self, session_id: Uuid) -> bool {
        let handle = {
            let mut state = self.state.write().await;
            let Some(slot) = state.by_id.remove(&session_id) else {
                return false;
            };
            let handle = state.sessions.remove(slot);
            if let Some(handle) = &handle {
                if let Some(ids) = state.by_company.get_mut(&handle.company_id) {
                    ids.remove(&session_id);
                    if ids.is_empty() {
                        state.by_company.remove(&handle.company_id);
                    }
                }
            }
            handle
        };

        match handle {
            Some(handle) => {
                handle.shutdown().await;
                debug!(session_id = %session_id, "Upload session evicted");
                true
            }
            None => false,
        }
    }
}

fn normalize_name(name: Option<String>) -> Result<Option<String>, AppError> {
    let Some(name) = name else {
        return Ok(None);
    };
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_FILE_NAME_LEN {
        return Err(AppError::InvalidInput(format!(
            "Session name exceeds {} characters",
            MAX_FILE_NAME_LEN
        )));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryUploadStore;
    use upsync_core::models::{ProgressStatus, SessionStatus};
    use upsync_core::EngineConfig;

    fn registry(limit: u64) -> (SessionRegistry, Arc<EngineContext>) {
        let config = EngineConfig {
            default_storage_limit_bytes: limit,
            ..EngineConfig::default()
        };
        let ctx = Arc::new(EngineContext::new(config, Arc::new(MemoryUploadStore::new())));
        (SessionRegistry::new(ctx.clone()), ctx)
    }

    #[tokio::test]
    async fn test_create_session_reserves_and_registers() {
        let (registry, ctx) = registry(2_000_000);
        let company = Uuid::new_v4();
        let snapshot = registry
            .create_session(
                Uuid::new_v4(),
                company,
                Some("  holiday  ".to_string()),
                vec![FileManifestEntry::new("a.jpg", 1_000_000)],
            )
            .await
            .unwrap();

        assert_eq!(snapshot.session.status, SessionStatus::Active);
        assert_eq!(snapshot.session.name.as_deref(), Some("holiday"));
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(snapshot.files[0].status, ProgressStatus::Pending);
        assert_eq!(snapshot.files[0].total_chunks, 1);

        let quota = ctx.quota.snapshot(company).await.unwrap();
        assert_eq!(quota.pending_bytes, 1_000_000);
        assert_eq!(registry.sessions_for_company(company).await, vec![snapshot.session.id]);
    }

    #[tokio::test]
    async fn test_rejected_session_leaves_nothing_behind() {
        let (registry, ctx) = registry(100);
        let company = Uuid::new_v4();

        let err = registry
            .create_session(Uuid::new_v4(), company, None, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let err = registry
            .create_session(
                Uuid::new_v4(),
                company,
                None,
                vec![FileManifestEntry::new("big.bin", 101)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { .. }));

        assert_eq!(registry.len().await, 0);
        assert_eq!(ctx.quota.snapshot(company).await.unwrap().pending_bytes, 0);
    }

    #[tokio::test]
    async fn test_unknown_and_evicted_sessions() {
        let (registry, _ctx) = registry(1_000);
        assert!(matches!(
            registry.get_session(Uuid::new_v4()).await,
            Err(AppError::SessionNotFound(_))
        ));

        let snapshot = registry
            .create_session(
                Uuid::new_v4(),
                Uuid::new_v4(),
                None,
                vec![FileManifestEntry::new("a", 10)],
            )
            .await
            .unwrap();
        let id = snapshot.session.id;
        assert!(registry.evict(id).await);
        assert!(!registry.evict(id).await);
        assert!(matches!(
            registry.get(id).await,
            Err(AppError::SessionNotFound(_))
        ));
    }
}
