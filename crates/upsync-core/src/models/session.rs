use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::UploadProgress;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "upload_session_status", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SessionStatus::Active => write!(f, "ACTIVE"),
            SessionStatus::Completed => write!(f, "COMPLETED"),
            SessionStatus::Failed => write!(f, "FAILED"),
            SessionStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(SessionStatus::Active),
            "COMPLETED" => Ok(SessionStatus::Completed),
            "FAILED" => Ok(SessionStatus::Failed),
            "CANCELLED" => Ok(SessionStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid upload session status: {}", s)),
        }
    }
}

/// A multi-file upload batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub company_id: Uuid,
    pub name: Option<String>,
    pub total_files: u32,
    pub completed_files: u32,
    pub failed_files: u32,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    pub fn new(
        owner_user_id: Uuid,
        company_id: Uuid,
        name: Option<String>,
        total_files: u32,
        total_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_user_id,
            company_id,
            name,
            total_files,
            completed_files: 0,
            failed_files: 0,
            total_bytes,
            uploaded_bytes: 0,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Files neither completed nor failed
    pub fn pending_files(&self) -> u32 {
        self.total_files
            .saturating_sub(self.completed_files + self.failed_files)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A session together with all of its progress rows, ordered by file index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: UploadSession,
    pub files: Vec<UploadProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_active() {
        let session = UploadSession::new(Uuid::new_v4(), Uuid::new_v4(), None, 3, 300, Utc::now());
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.pending_files(), 3);
        assert!(!session.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_display() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<SessionStatus>().unwrap(), status);
        }
        assert!(SessionStatus::Cancelled.is_terminal());
    }
}
