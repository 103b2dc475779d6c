//! Download Token Issuer
//!
//! Tokens live in an arena indexed by token string. Redemption checks and increments
//! under a single lock acquisition so concurrent redeems can never exceed
//! `max_downloads`.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use upsync_core::constants::DOWNLOAD_TOKEN_BYTES;
use upsync_core::error::TokenInvalidReason;
use upsync_core::models::{DownloadToken, IssueTokenOptions};
use upsync_core::{AppError, EngineConfig, UploadStore};
use uuid::Uuid;

use crate::arena::{Arena, SlotId};
use crate::registry::FileIndex;

#[derive(Default)]
struct TokenBook {
    tokens: Arena<DownloadToken>,
    by_token: HashMap<String, SlotId>,
}

impl TokenBook {
    fn lookup(&self, token: &str) -> Option<(SlotId, &DownloadToken)> {
        let slot = *self.by_token.get(token)?;
        self.tokens.get(slot).map(|t| (slot, t))
    }
}

/// Generate an unguessable URL-safe token string.
pub fn generate_token() -> String {
    let mut bytes = [0u8; DOWNLOAD_TOKEN_BYTES];
    let mut rng = rand::rng();
    rng.fill(&mut bytes[..]);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub struct TokenIssuer {
    book: Mutex<TokenBook>,
    store: Arc<dyn UploadStore>,
    default_ttl_secs: u64,
    default_max_downloads: u32,
}

impl TokenIssuer {
    pub fn new(config: &EngineConfig, store: Arc<dyn UploadStore>) -> Self {
        Self {
            book: Mutex::new(TokenBook::default()),
            store,
            default_ttl_secs: config.download_token_ttl_secs,
            default_max_downloads: config.download_token_max_downloads,
        }
    }

    /// Issue a token for a completed file. Only completed files carry a file id, so an
    /// id missing from the index is reported as not found.
    pub async fn issue(
        &self,
        files: &FileIndex,
        file_id: Uuid,
        user_id: Uuid,
        options: IssueTokenOptions,
    ) -> Result<DownloadToken, AppError> {
        if files.get(&file_id).is_none() {
            return Err(AppError::FileNotFound(file_id.to_string()));
        }

        let max_downloads = options.max_downloads.unwrap_or(self.default_max_downloads);
        if max_downloads == 0 {
            return Err(AppError::InvalidInput(
                "max_downloads must be at least 1".to_string(),
            ));
        }
        let ttl_secs = options.ttl_secs.unwrap_or(self.default_ttl_secs);
        if ttl_secs == 0 {
            return Err(AppError::InvalidInput(
                "Token TTL must be at least 1 second".to_string(),
            ));
        }
        let ttl = Duration::try_seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX))
            .ok_or_else(|| AppError::InvalidInput("Token TTL is too large".to_string()))?;

        let now = Utc::now();
        let token = {
            let mut book = self.book.lock().await;
            let mut value = generate_token();
            while book.by_token.contains_key(&value) {
                value = generate_token();
            }
            let token = DownloadToken {
                id: Uuid::new_v4(),
                file_id,
                user_id,
                token: value.clone(),
                expires_at: now + ttl,
                download_count: 0,
                max_downloads,
                ip_address: options.ip_address,
                user_agent: options.user_agent,
                created_at: now,
                last_used_at: None,
            };
            let slot = book.tokens.insert(token.clone());
            book.by_token.insert(value, slot);
            token
        };

        info!(
            token_id = %token.id,
            file_id = %file_id,
            max_downloads = max_downloads,
            expires_at = %token.expires_at,
            "Download token issued"
        );

        if let Err(e) = self.store.save_token(&token).await {
            warn!(token_id = %token.id, error = %e, "Failed to persist download token");
        }
        Ok(token)
    }

    /// Consume one download. Returns the file id on success.
    pub async fn redeem(&self, token: &str) -> Result<Uuid, AppError> {
        self.redeem_at(token, Utc::now()).await.map(|t| t.file_id)
    }

    pub(crate) async fn redeem_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<DownloadToken, AppError> {
        let redeemed = {
            let mut book = self.book.lock().await;
            let (slot, current) = book
                .lookup(token)
                .ok_or(AppError::TokenInvalid(TokenInvalidReason::NotFound))?;
            if let Err(reason) = current.check_usable(now) {
                debug!(token_id = %current.id, reason = %reason, "Download token rejected");
                return Err(AppError::TokenInvalid(reason));
            }
            let entry = book
                .tokens
                .get_mut(slot)
                .ok_or(AppError::TokenInvalid(TokenInvalidReason::NotFound))?;
            entry.download_count += 1;
            entry.last_used_at = Some(now);
            entry.clone()
        };

        debug!(
            token_id = %redeemed.id,
            file_id = %redeemed.file_id,
            download_count = redeemed.download_count,
            "Download token redeemed"
        );

        if let Err(e) = self.store.save_token(&redeemed).await {
            warn!(token_id = %redeemed.id, error = %e, "Failed to persist download token");
        }
        Ok(redeemed)
    }

    /// Read-only lookup.
    pub async fn inspect(&self, token: &str) -> Result<DownloadToken, AppError> {
        let book = self.book.lock().await;
        book.lookup(token)
            .map(|(_, t)| t.clone())
            .ok_or(AppError::TokenInvalid(TokenInvalidReason::NotFound))
    }

    /// Drop tokens that have been unusable for longer than `grace`. Returns the count.
    pub async fn purge(&self, now: DateTime<Utc>, grace: Duration) -> usize {
        let purged: Vec<Uuid> = {
            let mut book = self.book.lock().await;
            let dead: Vec<(SlotId, String)> = book
                .tokens
                .iter()
                .filter(|(_, t)| {
                    let dead_since = if t.download_count >= t.max_downloads {
                        t.last_used_at.unwrap_or(t.created_at).min(t.expires_at)
                    } else {
                        t.expires_at
                    };
                    !t.is_usable(now) && now - dead_since > grace
                })
                .map(|(slot, t)| (slot, t.token.clone()))
                .collect();

            let mut ids = Vec::with_capacity(dead.len());
            for (slot, value) in dead {
                book.by_token.remove(&value);
                if let Some(token) = book.tokens.remove(slot) {
                    ids.push(token.id);
                }
            }
            ids
        };

        if !purged.is_empty() {
            debug!(count = purged.len(), "Purged dead download tokens");
            if let Err(e) = self.store.delete_tokens(&purged).await {
                warn!(error = %e, "Failed to delete purged download tokens");
            }
        }
        purged.len()
    }

    pub async fn len(&self) -> usize {
        self.book.lock().await.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryUploadStore;
    use crate::registry::FileLocator;

    fn setup() -> (TokenIssuer, FileIndex, Uuid) {
        let issuer = TokenIssuer::new(&EngineConfig::default(), Arc::new(MemoryUploadStore::new()));
        let files = FileIndex::default();
        let file_id = Uuid::new_v4();
        files.insert(FileLocator {
            file_id,
            session_id: Uuid::new_v4(),
            file_index: 0,
            company_id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            file_name: "a.txt".to_string(),
            size_bytes: 3,
            content_type: None,
            completed_at: Utc::now(),
        });
        (issuer, files, file_id)
    }

    #[test]
    fn test_generated_tokens_are_url_safe() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn test_single_use_token() {
        let (issuer, files, file_id) = setup();
        let token = issuer
            .issue(&files, file_id, Uuid::new_v4(), IssueTokenOptions::default())
            .await
            .unwrap();
        assert_eq!(token.max_downloads, 1);

        assert_eq!(issuer.redeem(&token.token).await.unwrap(), file_id);
        assert_eq!(issuer.inspect(&token.token).await.unwrap().download_count, 1);
        assert!(matches!(
            issuer.redeem(&token.token).await,
            Err(AppError::TokenInvalid(TokenInvalidReason::Exhausted))
        ));
    }

    #[tokio::test]
    async fn test_expired_and_unknown_tokens() {
        let (issuer, files, file_id) = setup();
        let token = issuer
            .issue(
                &files,
                file_id,
                Uuid::new_v4(),
                IssueTokenOptions {
                    ttl_secs: Some(60),
                    max_downloads: Some(5),
                    ..IssueTokenOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            issuer.redeem_at(&token.token, token.expires_at).await,
            Err(AppError::TokenInvalid(TokenInvalidReason::Expired))
        ));
        assert!(matches!(
            issuer.redeem("nope").await,
            Err(AppError::TokenInvalid(TokenInvalidReason::NotFound))
        ));
    }

    #[tokio::test]
    async fn test_issue_requires_known_file() {
        let (issuer, files, _) = setup();
        let missing = Uuid::new_v4();
        assert!(matches!(
            issuer
                .issue(&files, missing, Uuid::new_v4(), IssueTokenOptions::default())
                .await,
            Err(AppError::FileNotFound(id)) if id == missing.to_string()
        ));
    }

    #[tokio::test]
    async fn test_concurrent_redeems_respect_max_downloads() {
        let (issuer, files, file_id) = setup();
        let issuer = Arc::new(issuer);
        let token = issuer
            .issue(
                &files,
                file_id,
                Uuid::new_v4(),
                IssueTokenOptions {
                    max_downloads: Some(3),
                    ..IssueTokenOptions::default()
                },
            )
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let issuer = issuer.clone();
            let value = token.token.clone();
            tasks.push(tokio::spawn(async move { issuer.redeem(&value).await }));
        }
        let mut ok = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(issuer.inspect(&token.token).await.unwrap().download_count, 3);
    }

    #[tokio::test]
    async fn test_purge_drops_dead_tokens_after_grace() {
        let (issuer, files, file_id) = setup();
        let token = issuer
            .issue(&files, file_id, Uuid::new_v4(), IssueTokenOptions::default())
            .await
            .unwrap();
        let live = issuer
            .issue(&files, file_id, Uuid::new_v4(), IssueTokenOptions::default())
            .await
            .unwrap();

        let used_at = Utc::now();
        issuer.redeem_at(&token.token, used_at).await.unwrap();

        assert_eq!(issuer.purge(used_at, Duration::minutes(5)).await, 0);
        assert_eq!(
            issuer
                .purge(used_at + Duration::minutes(6), Duration::minutes(5))
                .await,
            1
        );
        assert_eq!(issuer.len().await, 1);
        assert!(issuer.inspect(&live.token).await.is_ok());
    }
}
