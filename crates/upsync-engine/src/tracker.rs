//! Progress Tracker
//!
//! Per-file upload state machine. A `FileTracker` is owned by its session actor, so
//! every method here runs single-threaded and either fully applies a transition or
//! returns an error without touching the row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use upsync_core::constants::CANCELLED_MESSAGE;
use upsync_core::models::{percentage_of, ProgressStatus, UploadProgress};
use upsync_core::{AppError, OutOfOrderPolicy};
use uuid::Uuid;

use crate::throughput::{eta_seconds, Sample, SampleWindow};

/// What `record_chunk` did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDisposition {
    /// Applied, possibly together with previously buffered chunks
    Applied { chunks: u32, completed: bool },
    /// Held until its predecessors arrive
    Buffered,
    /// Already applied or already buffered; nothing changed
    Duplicate,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkRules {
    pub policy: OutOfOrderPolicy,
    pub max_buffered: usize,
}

pub struct FileTracker {
    progress: UploadProgress,
    buffered: BTreeMap<u32, u64>,
    samples: SampleWindow,
}

impl FileTracker {
    pub fn new(progress: UploadProgress, sample_window: usize) -> Self {
        Self {
            progress,
            buffered: BTreeMap::new(),
            samples: SampleWindow::new(sample_window),
        }
    }

    pub fn progress(&self) -> &UploadProgress {
        &self.progress
    }

    pub fn status(&self) -> ProgressStatus {
        self.progress.status
    }

    pub fn buffered_chunks(&self) -> usize {
        self.buffered.len()
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.progress.status.is_terminal() {
            return Err(AppError::FileAlreadyTerminal {
                session_id: self.progress.session_id,
                file_index: self.progress.file_index,
                status: self.progress.status,
            });
        }
        Ok(())
    }

    /// Apply, buffer or ignore one chunk.
    pub fn record_chunk(
        &mut self,
        chunk_index: u32,
        bytes: u64,
        total_chunks: u32,
        rules: ChunkRules,
        at: Instant,
        now: DateTime<Utc>,
    ) -> Result<ChunkDisposition, AppError> {
        self.ensure_open()?;

        // The first chunk of a file may restate the chunk count the client settled on.
        let untouched = self.progress.current_chunk == 0 && self.buffered.is_empty();
        let expected_total = if untouched {
            if total_chunks == 0 || u64::from(total_chunks) > self.progress.total_bytes {
                return Err(AppError::InvalidInput(format!(
                    "Invalid chunk count {} for a file of {} bytes",
                    total_chunks, self.progress.total_bytes
                )));
            }
            total_chunks
        } else {
            if total_chunks != self.progress.total_chunks {
                return Err(AppError::InvalidInput(format!(
                    "Chunk count {} does not match the file's {} chunks",
                    total_chunks, self.progress.total_chunks
                )));
            }
            self.progress.total_chunks
        };

        if chunk_index >= expected_total {
            return Err(AppError::InvalidInput(format!(
                "Chunk index {} is outside 0..{}",
                chunk_index, expected_total
            )));
        }

        if chunk_index < self.progress.current_chunk || self.buffered.contains_key(&chunk_index) {
            return Ok(ChunkDisposition::Duplicate);
        }

        if bytes == 0 {
            return Err(AppError::InvalidInput("Chunk is empty".to_string()));
        }

        let buffered_bytes: u64 = self.buffered.values().sum();
        let declared = self
            .progress
            .bytes_uploaded
            .saturating_add(buffered_bytes)
            .saturating_add(bytes);
        if declared > self.progress.total_bytes {
            return Err(AppError::InvalidInput(format!(
                "Chunk {} would exceed the file size of {} bytes",
                chunk_index, self.progress.total_bytes
            )));
        }
        // Every chunk slot still empty after this one needs at least one byte.
        let unfilled = u64::from(expected_total - self.progress.current_chunk)
            - self.buffered.len() as u64
            - 1;
        if declared + unfilled > self.progress.total_bytes {
            return Err(AppError::InvalidInput(format!(
                "Chunk {} leaves {} bytes for {} missing chunks",
                chunk_index,
                self.progress.total_bytes - declared,
                unfilled
            )));
        }

        if chunk_index > self.progress.current_chunk {
            let expected = self.progress.current_chunk;
            if rules.policy == OutOfOrderPolicy::Reject || self.buffered.len() >= rules.max_buffered
            {
                return Err(AppError::ChunkOutOfOrder {
                    expected,
                    received: chunk_index,
                });
            }
            self.progress.total_chunks = expected_total;
            self.buffered.insert(chunk_index, bytes);
            return Ok(ChunkDisposition::Buffered);
        }

        // Work out the contiguous run this chunk unlocks before mutating anything.
        let mut next = chunk_index + 1;
        let mut new_bytes = self.progress.bytes_uploaded + bytes;
        let mut drained = Vec::new();
        while let Some(size) = self.buffered.get(&next) {
            new_bytes += size;
            drained.push(next);
            next += 1;
        }

        if next == expected_total && new_bytes != self.progress.total_bytes {
            return Err(AppError::InvalidInput(format!(
                "Final chunk leaves the file at {} of {} bytes",
                new_bytes, self.progress.total_bytes
            )));
        }

        for index in &drained {
            self.buffered.remove(index);
        }

        let applied = next - self.progress.current_chunk;
        let progress = &mut self.progress;
        progress.total_chunks = expected_total;
        if progress.status == ProgressStatus::Pending {
            progress.status = ProgressStatus::Uploading;
            progress.started_at = Some(now);
        }
        progress.current_chunk = next;
        progress.bytes_uploaded = new_bytes;
        progress.progress_percentage = percentage_of(new_bytes, progress.total_bytes);
        progress.last_updated_at = now;

        self.samples.push(Sample {
            at,
            bytes: new_bytes,
        });
        let speed = self.samples.speed();
        self.progress.upload_speed_bytes_per_sec = speed;
        self.progress.estimated_seconds_remaining =
            eta_seconds(self.progress.remaining_bytes(), speed);

        Ok(ChunkDisposition::Applied {
            chunks: applied,
            completed: self.progress.is_fully_uploaded(),
        })
    }

    /// Returns false when the file was already completed (no change).
    pub fn mark_completed(&mut self, file_id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        if self.progress.status == ProgressStatus::Completed {
            return Ok(false);
        }
        self.ensure_open()?;
        if self.progress.bytes_uploaded != self.progress.total_bytes {
            return Err(AppError::IncompleteFile {
                uploaded: self.progress.bytes_uploaded,
                total: self.progress.total_bytes,
            });
        }

        let progress = &mut self.progress;
        progress.status = ProgressStatus::Completed;
        progress.progress_percentage = 100;
        progress.estimated_seconds_remaining = 0;
        progress.file_id = Some(file_id);
        progress.completed_at = Some(now);
        progress.last_updated_at = now;
        self.buffered.clear();
        Ok(true)
    }

    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure_open()?;
        let progress = &mut self.progress;
        progress.status = ProgressStatus::Failed;
        progress.error_message = Some(error.to_string());
        progress.completed_at = Some(now);
        progress.last_updated_at = now;
        self.buffered.clear();
        Ok(())
    }

    /// Returns false when the file was already terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.progress.status.is_terminal() {
            return false;
        }
        let progress = &mut self.progress;
        progress.status = ProgressStatus::Cancelled;
        progress.error_message = Some(CANCELLED_MESSAGE.to_string());
        progress.completed_at = Some(now);
        progress.last_updated_at = now;
        self.buffered.clear();
        true
    }

    /// True when an in-flight file has had no chunk within `inactivity`.
    ///
    /// PENDING files are measured against `session_activity` since they have never
    /// received a chunk of their own.
    pub fn is_stale(
        &self,
        now: DateTime<Utc>,
        inactivity: chrono::Duration,
        session_activity: DateTime<Utc>,
    ) -> bool {
        match self.progress.status {
            ProgressStatus::Uploading => now - self.progress.last_updated_at > inactivity,
            ProgressStatus::Pending => now - session_activity > inactivity,
            _ => false,
        }
    }
}

/// Compare a client-supplied SHA-256 hex digest against the payload.
pub fn verify_checksum(chunk_index: u32, data: &[u8], expected: &str) -> Result<(), AppError> {
    let actual = hex::encode(Sha256::digest(data));
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(AppError::ChecksumMismatch {
            chunk_index,
            expected: expected.trim().to_string(),
            actual,
        })
    }
}
