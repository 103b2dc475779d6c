//! Shared constants

/// Prefix of every REST route
pub const API_PREFIX: &str = "/api/v0";

/// `estimated_seconds_remaining` value when no speed has been observed yet
pub const ETA_UNKNOWN: i64 = -1;

/// Length in bytes of the random part of a download token before encoding
pub const DOWNLOAD_TOKEN_BYTES: usize = 32;

/// Longest accepted file name in a manifest
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Error message recorded on files failed by the stale-session reaper
pub const INACTIVITY_FAILURE_MESSAGE: &str = "Upload timed out due to inactivity";

/// Error message recorded on files pre-empted by a session cancel
pub const CANCELLED_MESSAGE: &str = "Upload session cancelled";
