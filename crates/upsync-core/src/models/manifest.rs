use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::constants::MAX_FILE_NAME_LEN;
use crate::error::AppError;

/// One declared file of an upload session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileManifestEntry {
    pub file_name: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl FileManifestEntry {
    pub fn new(file_name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            size_bytes,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let name = self.file_name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput(
                "File name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_FILE_NAME_LEN {
            return Err(AppError::InvalidInput(format!(
                "File name exceeds {} characters",
                MAX_FILE_NAME_LEN
            )));
        }
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(AppError::InvalidInput(format!(
                "File name contains invalid characters: {}",
                name
            )));
        }
        if self.size_bytes == 0 {
            return Err(AppError::InvalidInput(format!(
                "File {} has zero size",
                name
            )));
        }
        Ok(())
    }
}

/// Validate a whole manifest and return its declared byte total.
pub fn manifest_total_bytes(
    entries: &[FileManifestEntry],
    max_files: u32,
) -> Result<u64, AppError> {
    if entries.is_empty() {
        return Err(AppError::InvalidInput(
            "Upload session must declare at least one file".to_string(),
        ));
    }
    if entries.len() > max_files as usize {
        return Err(AppError::InvalidInput(format!(
            "Upload session declares {} files, maximum is {}",
            entries.len(),
            max_files
        )));
    }

    let mut total: u64 = 0;
    for entry in entries {
        entry.validate()?;
        total = total.checked_add(entry.size_bytes).ok_or_else(|| {
            AppError::InvalidInput("Declared total size overflows".to_string())
        })?;
    }
    Ok(total)
}

/// Downstream processing state reported through `file_processed` events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProcessingStatus::Pending => write!(f, "PENDING"),
            ProcessingStatus::Processing => write!(f, "PROCESSING"),
            ProcessingStatus::Completed => write!(f, "COMPLETED"),
            ProcessingStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            "COMPLETED" => Ok(ProcessingStatus::Completed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid processing status: {}", s)),
        }
    }
}
