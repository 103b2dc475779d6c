use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TokenInvalidReason;

/// Time-boxed, limited-use download credential for a completed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadToken {
    pub id: Uuid,
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub download_count: u32,
    pub max_downloads: u32,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl DownloadToken {
    /// Ok when the token may be redeemed at `now`. Expiry wins over exhaustion.
    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), TokenInvalidReason> {
        if now >= self.expires_at {
            return Err(TokenInvalidReason::Expired);
        }
        if self.download_count >= self.max_downloads {
            return Err(TokenInvalidReason::Exhausted);
        }
        Ok(())
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.check_usable(now).is_ok()
    }

    pub fn remaining_downloads(&self) -> u32 {
        self.max_downloads.saturating_sub(self.download_count)
    }
}

/// Request parameters for issuing a token; unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenOptions {
    pub ttl_secs: Option<u64>,
    pub max_downloads: Option<u32>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(count: u32, max: u32, expires_in: Duration) -> DownloadToken {
        let now = Utc::now();
        DownloadToken {
            id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token: "abc".to_string(),
            expires_at: now + expires_in,
            download_count: count,
            max_downloads: max,
            ip_address: None,
            user_agent: None,
            created_at: now,
            last_used_at: None,
        }
    }

    #[test]
    fn test_usable_window() {
        let now = Utc::now();
        assert!(token(0, 1, Duration::hours(1)).is_usable(now));
        assert_eq!(
            token(1, 1, Duration::hours(1)).check_usable(now),
            Err(TokenInvalidReason::Exhausted)
        );
        assert_eq!(
            token(0, 1, Duration::hours(-1)).check_usable(now),
            Err(TokenInvalidReason::Expired)
        );
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let t = token(0, 3, Duration::hours(1));
        assert_eq!(t.check_usable(t.expires_at), Err(TokenInvalidReason::Expired));
        assert_eq!(t.remaining_downloads(), 3);
    }
}
