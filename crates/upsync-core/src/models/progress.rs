use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::FileManifestEntry;
use crate::constants::ETA_UNKNOWN;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "upload_progress_status", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProgressStatus::Completed | ProgressStatus::Failed | ProgressStatus::Cancelled
        )
    }
}

impl Display for ProgressStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProgressStatus::Pending => write!(f, "PENDING"),
            ProgressStatus::Uploading => write!(f, "UPLOADING"),
            ProgressStatus::Completed => write!(f, "COMPLETED"),
            ProgressStatus::Failed => write!(f, "FAILED"),
            ProgressStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for ProgressStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(ProgressStatus::Pending),
            "UPLOADING" => Ok(ProgressStatus::Uploading),
            "COMPLETED" => Ok(ProgressStatus::Completed),
            "FAILED" => Ok(ProgressStatus::Failed),
            "CANCELLED" => Ok(ProgressStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid upload progress status: {}", s)),
        }
    }
}

/// Per-file upload state inside a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub id: Uuid,
    pub session_id: Uuid,
    pub file_index: u32,
    pub file_name: String,
    pub content_type: Option<String>,
    /// Assigned when the file completes
    pub file_id: Option<Uuid>,
    pub owner_user_id: Uuid,
    pub status: ProgressStatus,
    pub progress_percentage: u8,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub upload_speed_bytes_per_sec: u64,
    /// -1 while unknown
    pub estimated_seconds_remaining: i64,
    /// Number of contiguous chunks applied, which is also the next expected index
    pub current_chunk: u32,
    pub total_chunks: u32,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

impl UploadProgress {
    pub fn pending(
        session_id: Uuid,
        file_index: u32,
        owner_user_id: Uuid,
        entry: &FileManifestEntry,
        total_chunks: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            file_index,
            file_name: entry.file_name.clone(),
            content_type: entry.content_type.clone(),
            file_id: None,
            owner_user_id,
            status: ProgressStatus::Pending,
            progress_percentage: 0,
            bytes_uploaded: 0,
            total_bytes: entry.size_bytes,
            upload_speed_bytes_per_sec: 0,
            estimated_seconds_remaining: ETA_UNKNOWN,
            current_chunk: 0,
            total_chunks,
            error_message: None,
            started_at: None,
            completed_at: None,
            last_updated_at: now,
        }
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.bytes_uploaded)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// All declared bytes and chunks have been applied
    pub fn is_fully_uploaded(&self) -> bool {
        self.bytes_uploaded == self.total_bytes && self.current_chunk == self.total_chunks
    }
}

/// floor(uploaded * 100 / total), 0 for empty totals
pub fn percentage_of(uploaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (uploaded as u128 * 100) / total as u128;
    pct.min(100) as u8
}

/// ceil(size / chunk_size), never below 1
pub fn chunk_count(size_bytes: u64, chunk_size: u64) -> u32 {
    if chunk_size == 0 {
        return 1;
    }
    let chunks = size_bytes.div_ceil(chunk_size).max(1);
    u32::try_from(chunks).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_floors() {
        assert_eq!(percentage_of(0, 100), 0);
        assert_eq!(percentage_of(999, 1000), 99);
        assert_eq!(percentage_of(1000, 1000), 100);
        assert_eq!(percentage_of(5, 0), 0);
        assert_eq!(percentage_of(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(10 * 1024 * 1024, 5 * 1024 * 1024), 2);
        assert_eq!(chunk_count(10 * 1024 * 1024 + 1, 5 * 1024 * 1024), 3);
        assert_eq!(chunk_count(1, 5 * 1024 * 1024), 1);
        assert_eq!(chunk_count(0, 5 * 1024 * 1024), 1);
    }

    #[test]
    fn test_pending_row_starts_with_unknown_eta() {
        let entry = FileManifestEntry::new("a.bin", 10);
        let row = UploadProgress::pending(Uuid::new_v4(), 0, Uuid::new_v4(), &entry, 1, Utc::now());
        assert_eq!(row.status, ProgressStatus::Pending);
        assert_eq!(row.estimated_seconds_remaining, ETA_UNKNOWN);
        assert_eq!(row.remaining_bytes(), 10);
        assert!(!row.is_fully_uploaded());
    }
}
