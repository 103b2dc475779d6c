use std::sync::Arc;

use tracing::warn;
use upsync_core::models::{UploadProgress, UploadSession};
use upsync_core::{EngineConfig, UploadStore};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::quota::QuotaLedger;
use crate::registry::FileIndex;

/// Shared collaborators handed to every session actor.
pub struct EngineContext {
    pub config: EngineConfig,
    pub store: Arc<dyn UploadStore>,
    pub quota: QuotaLedger,
    pub broadcaster: Arc<Broadcaster>,
    pub files: FileIndex,
}

impl EngineContext {
    pub fn new(config: EngineConfig, store: Arc<dyn UploadStore>) -> Self {
        let quota = QuotaLedger::new(
            store.clone(),
            config.default_storage_limit_bytes,
            config.actor_mailbox_capacity,
        );
        let broadcaster = Arc::new(Broadcaster::new(
            config.broadcast_buffer_size,
            config.broadcast_overflow_policy,
        ));
        Self {
            config,
            store,
            quota,
            broadcaster,
            files: FileIndex::default(),
        }
    }

    pub fn download_url(&self, file_id: Uuid) -> String {
        format!(
            "{}/{}",
            self.config.download_base_url.trim_end_matches('/'),
            file_id
        )
    }

    // Store failures never fail the operation; the in-memory state stays authoritative.

    pub async fn persist_session(&self, session: &UploadSession) {
        if let Err(e) = self.store.save_session(session).await {
            warn!(session_id = %session.id, error = %e, "Failed to persist upload session");
        }
    }

    pub async fn persist_progress(&self, progress: &UploadProgress) {
        if let Err(e) = self.store.save_progress(progress).await {
            warn!(
                session_id = %progress.session_id,
                file_index = progress.file_index,
                error = %e,
                "Failed to persist upload progress"
            );
        }
    }
}
