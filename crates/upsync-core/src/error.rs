//! Error types module
//!
//! All failures of the upload engine are unified under the `AppError` enum. Quota and
//! validation errors are caller-visible and never leave partial state behind; per-file
//! failures are data (a FAILED progress row), not errors.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::fmt::{Display, Formatter, Result as FmtResult};

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;
use uuid::Uuid;

use crate::models::{ProgressStatus, SessionStatus};

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like resource limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "QUOTA_EXCEEDED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Why a download token could not be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenInvalidReason {
    Expired,
    Exhausted,
    NotFound,
}

impl Display for TokenInvalidReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TokenInvalidReason::Expired => write!(f, "expired"),
            TokenInvalidReason::Exhausted => write!(f, "exhausted"),
            TokenInvalidReason::NotFound => write!(f, "not found"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Quota exceeded for company {company_id}: requested {requested} bytes, {available} bytes available")]
    QuotaExceeded {
        company_id: Uuid,
        requested: u64,
        available: u64,
    },

    #[error("Upload session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Upload session {session_id} is already {status}")]
    SessionAlreadyTerminal {
        session_id: Uuid,
        status: SessionStatus,
    },

    #[error("File {file_index} of session {session_id} is already {status}")]
    FileAlreadyTerminal {
        session_id: Uuid,
        file_index: u32,
        status: ProgressStatus,
    },

    #[error("Chunk out of order: expected chunk {expected}, received {received}")]
    ChunkOutOfOrder { expected: u32, received: u32 },

    #[error("Checksum mismatch for chunk {chunk_index}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        chunk_index: u32,
        expected: String,
        actual: String,
    },

    #[error("File is incomplete: {uploaded} of {total} bytes uploaded")]
    IncompleteFile { uploaded: u64, total: u64 },

    #[error("File {0} has not finished uploading")]
    FileNotCompleted(Uuid),

    #[error("Download token {0}")]
    TokenInvalid(TokenInvalidReason),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::QuotaExceeded { .. } => (
            413,
            "QUOTA_EXCEEDED",
            false,
            Some("Free up storage or request a higher limit"),
            false,
            LogLevel::Warn,
        ),
        AppError::SessionNotFound(_) => (
            404,
            "SESSION_NOT_FOUND",
            false,
            Some("Verify the upload session ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::FileNotFound(_) => (
            404,
            "FILE_NOT_FOUND",
            false,
            Some("Verify the file ID or index exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::SessionAlreadyTerminal { .. } => (
            409,
            "SESSION_ALREADY_TERMINAL",
            false,
            Some("Start a new upload session"),
            false,
            LogLevel::Debug,
        ),
        AppError::FileAlreadyTerminal { .. } => (
            409,
            "FILE_ALREADY_TERMINAL",
            false,
            Some("Start a new upload session for this file"),
            false,
            LogLevel::Debug,
        ),
        AppError::ChunkOutOfOrder { .. } => (
            409,
            "CHUNK_OUT_OF_ORDER",
            true,
            Some("Upload the missing preceding chunk, then retry"),
            false,
            LogLevel::Debug,
        ),
        AppError::ChecksumMismatch { .. } => (
            422,
            "CHECKSUM_MISMATCH",
            true,
            Some("Retry the chunk upload"),
            false,
            LogLevel::Debug,
        ),
        AppError::IncompleteFile { .. } => (
            409,
            "INCOMPLETE_FILE",
            false,
            Some("Upload all chunks before completing the file"),
            false,
            LogLevel::Debug,
        ),
        AppError::FileNotCompleted(_) => (
            409,
            "FILE_NOT_COMPLETED",
            false,
            Some("Wait for the upload to complete"),
            false,
            LogLevel::Debug,
        ),
        AppError::TokenInvalid(TokenInvalidReason::NotFound) => (
            404,
            "TOKEN_NOT_FOUND",
            false,
            Some("Request a new download link"),
            false,
            LogLevel::Debug,
        ),
        AppError::TokenInvalid(TokenInvalidReason::Expired) => (
            410,
            "TOKEN_EXPIRED",
            false,
            Some("Request a new download link"),
            false,
            LogLevel::Debug,
        ),
        AppError::TokenInvalid(TokenInvalidReason::Exhausted) => (
            410,
            "TOKEN_EXHAUSTED",
            false,
            Some("Request a new download link"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::Unavailable(_) => (
            503,
            "SERVICE_UNAVAILABLE",
            true,
            Some("Retry after a short delay"),
            false,
            LogLevel::Warn,
        ),
        #[cfg(feature = "sqlx")]
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::QuotaExceeded { .. } => "QuotaExceeded",
            AppError::SessionNotFound(_) => "SessionNotFound",
            AppError::FileNotFound(_) => "FileNotFound",
            AppError::SessionAlreadyTerminal { .. } => "SessionAlreadyTerminal",
            AppError::FileAlreadyTerminal { .. } => "FileAlreadyTerminal",
            AppError::ChunkOutOfOrder { .. } => "ChunkOutOfOrder",
            AppError::ChecksumMismatch { .. } => "ChecksumMismatch",
            AppError::IncompleteFile { .. } => "IncompleteFile",
            AppError::FileNotCompleted(_) => "FileNotCompleted",
            AppError::TokenInvalid(_) => "TokenInvalid",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Unavailable(_) => "Unavailable",
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Bytes by which a rejected reservation overshoots the company limit.
    pub fn quota_overshoot(&self) -> Option<u64> {
        match self {
            AppError::QuotaExceeded {
                requested,
                available,
                ..
            } => Some(requested.saturating_sub(*available)),
            _ => None,
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
            AppError::QuotaExceeded {
                requested,
                available,
                ..
            } => format!(
                "Storage quota exceeded: {} bytes requested, {} bytes available",
                requested, available
            ),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_quota_exceeded() {
        let err = AppError::QuotaExceeded {
            company_id: Uuid::nil(),
            requested: 2_000_001,
            available: 2_000_000,
        };
        assert_eq!(err.http_status_code(), 413);
        assert_eq!(err.error_code(), "QUOTA_EXCEEDED");
        assert!(!err.is_recoverable());
        assert_eq!(err.quota_overshoot(), Some(1));
        assert!(err.client_message().contains("2000001"));
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_error_metadata_chunk_errors_are_retryable() {
        let out_of_order = AppError::ChunkOutOfOrder {
            expected: 2,
            received: 5,
        };
        assert!(out_of_order.is_recoverable());
        assert_eq!(out_of_order.http_status_code(), 409);

        let mismatch = AppError::ChecksumMismatch {
            chunk_index: 1,
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(mismatch.is_recoverable());
        assert_eq!(mismatch.suggested_action(), Some("Retry the chunk upload"));
    }

    #[test]
    fn test_token_reasons_are_distinguishable() {
        let expired = AppError::TokenInvalid(TokenInvalidReason::Expired);
        let exhausted = AppError::TokenInvalid(TokenInvalidReason::Exhausted);
        let missing = AppError::TokenInvalid(TokenInvalidReason::NotFound);
        assert_eq!(expired.error_code(), "TOKEN_EXPIRED");
        assert_eq!(exhausted.error_code(), "TOKEN_EXHAUSTED");
        assert_eq!(missing.http_status_code(), 404);
        assert_eq!(exhausted.to_string(), "Download token exhausted");
    }

    #[test]
    fn test_internal_errors_are_sensitive() {
        let err = AppError::from(anyhow::anyhow!("connection reset"));
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Internal server error");
        assert_eq!(err.error_type(), "Internal");
    }

    #[cfg(feature = "sqlx")]
    #[test]
    fn test_database_errors_are_hidden() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Failed to access database");
    }
}
