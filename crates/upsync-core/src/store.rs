//! Persistence seam
//!
//! The engine keeps authoritative state in its actors and writes every mutation through
//! an `UploadStore`. The Postgres implementation lives in `upsync-db`; an in-memory one
//! ships with the engine for tests and database-less deployments.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{DownloadToken, FileAssociation, StorageQuota, UploadProgress, UploadSession};

#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Insert or update a session row
    async fn save_session(&self, session: &UploadSession) -> Result<(), AppError>;

    /// Insert or update a progress row
    async fn save_progress(&self, progress: &UploadProgress) -> Result<(), AppError>;

    /// Load the persisted quota row for a company, if any
    async fn load_quota(&self, company_id: Uuid) -> Result<Option<StorageQuota>, AppError>;

    /// Insert or update the quota row for a company
    async fn save_quota(&self, quota: &StorageQuota) -> Result<(), AppError>;

    /// Insert or update a download token
    async fn save_token(&self, token: &DownloadToken) -> Result<(), AppError>;

    /// Remove purged tokens
    async fn delete_tokens(&self, ids: &[Uuid]) -> Result<(), AppError>;

    async fn save_association(&self, association: &FileAssociation) -> Result<(), AppError>;

    /// Connectivity check for health reporting
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
