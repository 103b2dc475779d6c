use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Committed storage accounting for one company.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    pub company_id: Uuid,
    pub storage_limit_bytes: u64,
    pub storage_used_bytes: u64,
    pub file_count: u64,
    pub last_calculated_at: DateTime<Utc>,
}

impl StorageQuota {
    pub fn new(company_id: Uuid, storage_limit_bytes: u64, now: DateTime<Utc>) -> Self {
        Self {
            company_id,
            storage_limit_bytes,
            storage_used_bytes: 0,
            file_count: 0,
            last_calculated_at: now,
        }
    }

    /// Bytes still reservable once `pending` provisional holds are taken into account
    pub fn available(&self, pending: u64) -> u64 {
        self.storage_limit_bytes
            .saturating_sub(self.storage_used_bytes)
            .saturating_sub(pending)
    }
}

/// Quota state including in-flight reservations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub quota: StorageQuota,
    pub pending_bytes: u64,
    pub active_reservations: usize,
}

impl QuotaSnapshot {
    pub fn available(&self) -> u64 {
        self.quota.available(self.pending_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_accounts_for_pending() {
        let mut quota = StorageQuota::new(Uuid::new_v4(), 2_000_000, Utc::now());
        quota.storage_used_bytes = 500_000;
        assert_eq!(quota.available(0), 1_500_000);
        assert_eq!(quota.available(1_000_000), 500_000);
        assert_eq!(quota.available(3_000_000), 0);
    }
}
