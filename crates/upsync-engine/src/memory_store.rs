//! In-memory `UploadStore`, used by tests and when no database is configured.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use upsync_core::models::{
    DownloadToken, FileAssociation, StorageQuota, UploadProgress, UploadSession,
};
use upsync_core::{AppError, UploadStore};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryUploadStore {
    sessions: DashMap<Uuid, UploadSession>,
    progress: DashMap<(Uuid, u32), UploadProgress>,
    quotas: DashMap<Uuid, StorageQuota>,
    tokens: DashMap<Uuid, DownloadToken>,
    associations: DashMap<Uuid, FileAssociation>,
    fail_writes: AtomicBool,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a storage error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(AppError::Storage("store is read-only".to_string()));
        }
        Ok(())
    }

    pub fn session(&self, id: Uuid) -> Option<UploadSession> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    pub fn progress(&self, session_id: Uuid, file_index: u32) -> Option<UploadProgress> {
        self.progress
            .get(&(session_id, file_index))
            .map(|p| p.clone())
    }

    pub fn quota(&self, company_id: Uuid) -> Option<StorageQuota> {
        self.quotas.get(&company_id).map(|q| q.clone())
    }

    pub fn token(&self, id: Uuid) -> Option<DownloadToken> {
        self.tokens.get(&id).map(|t| t.clone())
    }

    pub fn associations_for(&self, file_id: Uuid) -> Vec<FileAssociation> {
        self.associations
            .iter()
            .filter(|a| a.file_id == file_id)
            .map(|a| a.clone())
            .collect()
    }

    /// Seed a quota row, as if it had been persisted by an earlier process.
    pub fn insert_quota(&self, quota: StorageQuota) {
        self.quotas.insert(quota.company_id, quota);
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn save_session(&self, session: &UploadSession) -> Result<(), AppError> {
        self.check_writable()?;
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn save_progress(&self, progress: &UploadProgress) -> Result<(), AppError> {
        self.check_writable()?;
        self.progress
            .insert((progress.session_id, progress.file_index), progress.clone());
        Ok(())
    }

    async fn load_quota(&self, company_id: Uuid) -> Result<Option<StorageQuota>, AppError> {
        Ok(self.quota(company_id))
    }

    async fn save_quota(&self, quota: &StorageQuota) -> Result<(), AppError> {
        self.check_writable()?;
        self.quotas.insert(quota.company_id, quota.clone());
        Ok(())
    }

    async fn save_token(&self, token: &DownloadToken) -> Result<(), AppError> {
        self.check_writable()?;
        self.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn delete_tokens(&self, ids: &[Uuid]) -> Result<(), AppError> {
        self.check_writable()?;
        for id in ids {
            self.tokens.remove(id);
        }
        Ok(())
    }

    async fn save_association(&self, association: &FileAssociation) -> Result<(), AppError> {
        self.check_writable()?;
        self.associations
            .insert(association.id, association.clone());
        Ok(())
    }
}
