//! Session actor
//!
//! One task per upload session owns the `UploadSession` row and the trackers of all its
//! files. Every mutation of a session, and every event published about it, goes through
//! this task, so subscribers see a session's events in the order they happened.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use upsync_core::constants::{CANCELLED_MESSAGE, INACTIVITY_FAILURE_MESSAGE};
use upsync_core::models::{
    chunk_count, FileManifestEntry, ProgressStatus, SessionSnapshot, SessionStatus,
    UploadProgress, UploadSession,
};
use upsync_core::{AppError, Room, ServerEvent};
use uuid::Uuid;

use crate::broadcast::ConnectionHandle;
use crate::context::EngineContext;
use crate::quota::ReservationHandle;
use crate::registry::FileLocator;
use crate::tracker::{ChunkDisposition, ChunkRules, FileTracker};

/// Result of a chunk delivery.
#[derive(Debug, Clone)]
pub struct ChunkReceipt {
    pub disposition: ChunkDisposition,
    pub progress: UploadProgress,
    pub session_status: SessionStatus,
}

enum SessionCommand {
    RecordChunk {
        file_index: u32,
        chunk_index: u32,
        bytes: u64,
        total_chunks: u32,
        response: oneshot::Sender<Result<ChunkReceipt, AppError>>,
    },
    CompleteFile {
        file_index: u32,
        response: oneshot::Sender<Result<UploadProgress, AppError>>,
    },
    FailFile {
        file_index: u32,
        error: String,
        response: oneshot::Sender<Result<UploadProgress, AppError>>,
    },
    AddFile {
        entry: FileManifestEntry,
        response: oneshot::Sender<Result<UploadProgress, AppError>>,
    },
    Cancel {
        reason: Option<String>,
        response: oneshot::Sender<Result<UploadSession, AppError>>,
    },
    Snapshot {
        response: oneshot::Sender<SessionSnapshot>,
    },
    JoinRoom {
        connection: ConnectionHandle,
        response: oneshot::Sender<bool>,
    },
    ReapStale {
        now: DateTime<Utc>,
        inactivity: chrono::Duration,
        response: oneshot::Sender<usize>,
    },
    Shutdown,
}

struct SessionActor {
    session: UploadSession,
    files: Vec<FileTracker>,
    reservation: ReservationHandle,
    ctx: Arc<EngineContext>,
    closed: CancellationToken,
    room: Room,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        debug!(session_id = %self.session.id, "Session actor started");

        while let Some(cmd) = rx.recv().await {
            match cmd {
                SessionCommand::RecordChunk {
                    file_index,
                    chunk_index,
                    bytes,
                    total_chunks,
                    response,
                } => {
                    let result = self
                        .record_chunk(file_index, chunk_index, bytes, total_chunks)
                        .await;
                    let _ = response.send(result);
                }

                SessionCommand::CompleteFile {
                    file_index,
                    response,
                } => {
                    let result = self.complete_file(file_index).await;
                    let _ = response.send(result);
                }

                SessionCommand::FailFile {
                    file_index,
                    error,
                    response,
                } => {
                    let result = match self.fail_file(file_index, &error).await {
                        Ok(row) => {
                            self.roll_up().await;
                            Ok(row)
                        }
                        Err(e) => Err(e),
                    };
                    let _ = response.send(result);
                }

                SessionCommand::AddFile { entry, response } => {
                    let result = self.add_file(entry).await;
                    let _ = response.send(result);
                }

                SessionCommand::Cancel { reason, response } => {
                    let result = self.cancel(reason).await;
                    let _ = response.send(result);
                }

                SessionCommand::Snapshot { response } => {
                    let _ = response.send(self.snapshot());
                }

                SessionCommand::JoinRoom {
                    connection,
                    response,
                } => {
                    let _ = response.send(self.join_room(connection));
                }

                SessionCommand::ReapStale {
                    now,
                    inactivity,
                    response,
                } => {
                    let reaped = self.reap_stale(now, inactivity).await;
                    let _ = response.send(reaped);
                }

                SessionCommand::Shutdown => break,
            }
        }

        debug!(session_id = %self.session.id, "Session actor stopped");
    }

    fn ensure_active(&self) -> Result<(), AppError> {
        if self.session.status.is_terminal() {
            return Err(AppError::SessionAlreadyTerminal {
                session_id: self.session.id,
                status: self.session.status,
            });
        }
        Ok(())
    }

    fn file_mut(&mut self, file_index: u32) -> Result<&mut FileTracker, AppError> {
        let session_id = self.session.id;
        self.files
            .get_mut(file_index as usize)
            .ok_or_else(|| AppError::FileNotFound(format!("{}#{}", session_id, file_index)))
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            files: self.files.iter().map(|f| f.progress().clone()).collect(),
        }
    }

    fn publish(&self, event: ServerEvent) {
        let delivered = self.ctx.broadcaster.publish(self.room, event);
        debug!(session_id = %self.session.id, delivered = delivered, "Session event published");
    }

    async fn record_chunk(
        &mut self,
        file_index: u32,
        chunk_index: u32,
        bytes: u64,
        total_chunks: u32,
    ) -> Result<ChunkReceipt, AppError> {
        self.ensure_active()?;
        let rules = ChunkRules {
            policy: self.ctx.config.out_of_order_policy,
            max_buffered: self.ctx.config.max_buffered_chunks,
        };
        let now = Utc::now();
        let disposition = self.file_mut(file_index)?.record_chunk(
            chunk_index,
            bytes,
            total_chunks,
            rules,
            Instant::now(),
            now,
        )?;

        if let ChunkDisposition::Applied { completed, .. } = disposition {
            self.session.uploaded_bytes = self
                .files
                .iter()
                .map(|f| f.progress().bytes_uploaded)
                .sum();
            self.session.updated_at = now;

            let row = self.files[file_index as usize].progress().clone();
            self.ctx.persist_progress(&row).await;
            self.ctx.persist_session(&self.session).await;
            self.publish(ServerEvent::progress(&row));

            if completed {
                self.complete_file(file_index).await?;
            }
        } else {
            debug!(
                session_id = %self.session.id,
                file_index = file_index,
                chunk_index = chunk_index,
                disposition = ?disposition,
                "Chunk not applied"
            );
        }

        Ok(ChunkReceipt {
            disposition,
            progress: self.files[file_index as usize].progress().clone(),
            session_status: self.session.status,
        })
    }

    async fn complete_file(&mut self, file_index: u32) -> Result<UploadProgress, AppError> {
        let file = self
            .files
            .get(file_index as usize)
            .ok_or_else(|| {
                AppError::FileNotFound(format!("{}#{}", self.session.id, file_index))
            })?;
        if file.status() == ProgressStatus::Completed {
            return Ok(file.progress().clone());
        }
        self.ensure_active()?;

        let file_id = Uuid::new_v4();
        let now = Utc::now();
        self.file_mut(file_index)?.mark_completed(file_id, now)?;
        let row = self.files[file_index as usize].progress().clone();

        self.ctx.files.insert(FileLocator {
            file_id,
            session_id: self.session.id,
            file_index,
            company_id: self.session.company_id,
            owner_user_id: self.session.owner_user_id,
            file_name: row.file_name.clone(),
            size_bytes: row.total_bytes,
            content_type: row.content_type.clone(),
            completed_at: now,
        });

        info!(
            session_id = %self.session.id,
            file_index = file_index,
            file_id = %file_id,
            size = row.total_bytes,
            "File upload completed"
        );

        self.ctx.persist_progress(&row).await;
        self.publish(ServerEvent::completed(
            &row,
            file_id,
            self.ctx.download_url(file_id),
        ));
        self.roll_up().await;
        Ok(row)
    }

    async fn fail_file(&mut self, file_index: u32, error: &str) -> Result<UploadProgress, AppError> {
        self.ensure_active()?;
        self.file_mut(file_index)?.mark_failed(error, Utc::now())?;
        let row = self.files[file_index as usize].progress().clone();

        warn!(
            session_id = %self.session.id,
            file_index = file_index,
            error = error,
            "File upload failed"
        );

        self.ctx.persist_progress(&row).await;
        self.publish(ServerEvent::failed(
            self.session.id,
            Some(row.file_name.clone()),
            error,
        ));
        Ok(row)
    }

    /// Recompute counters after a per-file terminal transition and finalize the session
    /// once nothing is left in flight.
    async fn roll_up(&mut self) {
        let now = Utc::now();
        let mut completed = 0u32;
        let mut failed = 0u32;
        let mut open = 0u32;
        let mut completed_bytes = 0u64;
        for file in &self.files {
            match file.status() {
                ProgressStatus::Completed => {
                    completed += 1;
                    completed_bytes += file.progress().bytes_uploaded;
                }
                ProgressStatus::Failed => failed += 1,
                ProgressStatus::Pending | ProgressStatus::Uploading => open += 1,
                ProgressStatus::Cancelled => {}
            }
        }

        self.session.completed_files = completed;
        self.session.failed_files = failed;
        self.session.updated_at = now;

        let terminal = if completed == self.session.total_files {
            Some(SessionStatus::Completed)
        } else if failed > 0 && open == 0 {
            Some(SessionStatus::Failed)
        } else {
            None
        };

        if let Some(status) = terminal {
            self.session.status = status;
            self.session.completed_at = Some(now);
            self.finalize_quota(completed_bytes, completed).await;
            self.closed.cancel();
            info!(
                session_id = %self.session.id,
                status = %status,
                completed_files = completed,
                failed_files = failed,
                "Upload session finished"
            );
        }

        self.ctx.persist_session(&self.session).await;
        let update = ServerEvent::session_updated(&self.session);
        self.ctx
            .broadcaster
            .publish(Room::company(self.session.company_id), update.clone());
        self.publish(update);
    }

    /// Commit the bytes of completed files and drop the rest of the hold.
    async fn finalize_quota(&self, completed_bytes: u64, completed_files: u32) {
        let result = if completed_files > 0 {
            self.ctx
                .quota
                .commit(&self.reservation, completed_bytes, u64::from(completed_files))
                .await
                .map(|_| ())
        } else {
            self.ctx.quota.release(&self.reservation).await.map(|_| ())
        };
        if let Err(e) = result {
            error!(
                session_id = %self.session.id,
                reservation_id = %self.reservation.id,
                error = %e,
                "Failed to finalize quota reservation"
            );
        }
    }

    async fn add_file(&mut self, entry: FileManifestEntry) -> Result<UploadProgress, AppError> {
        self.ensure_active()?;
        entry.validate()?;
        if self.session.total_files >= self.ctx.config.max_files_per_session {
            return Err(AppError::InvalidInput(format!(
                "Upload session already holds the maximum of {} files",
                self.ctx.config.max_files_per_session
            )));
        }

        self.ctx
            .quota
            .extend(&self.reservation, entry.size_bytes)
            .await?;

        let now = Utc::now();
        let file_index = self.files.len() as u32;
        let row = UploadProgress::pending(
            self.session.id,
            file_index,
            self.session.owner_user_id,
            &entry,
            chunk_count(entry.size_bytes, self.ctx.config.default_chunk_size_bytes),
            now,
        );
        self.files
            .push(FileTracker::new(row.clone(), self.ctx.config.speed_sample_window));
        self.session.total_files += 1;
        self.session.total_bytes += entry.size_bytes;
        self.session.updated_at = now;

        debug!(
            session_id = %self.session.id,
            file_index = file_index,
            size = entry.size_bytes,
            "File added to upload session"
        );

        self.ctx.persist_progress(&row).await;
        self.ctx.persist_session(&self.session).await;
        self.publish(ServerEvent::session_updated(&self.session));
        Ok(row)
    }

    async fn cancel(&mut self, reason: Option<String>) -> Result<UploadSession, AppError> {
        self.ensure_active()?;
        let now = Utc::now();

        let mut cancelled = Vec::new();
        for file in &mut self.files {
            if file.cancel(now) {
                cancelled.push(file.progress().clone());
            }
        }
        for row in &cancelled {
            self.ctx.persist_progress(row).await;
        }

        let (completed_files, completed_bytes) = self
            .files
            .iter()
            .map(FileTracker::progress)
            .filter(|p| p.status == ProgressStatus::Completed)
            .fold((0u32, 0u64), |(files, bytes), p| {
                (files + 1, bytes + p.bytes_uploaded)
            });

        self.session.status = SessionStatus::Cancelled;
        self.session.completed_files = completed_files;
        self.session.completed_at = Some(now);
        self.session.updated_at = now;
        self.finalize_quota(completed_bytes, completed_files).await;
        self.closed.cancel();

        let reason = reason.unwrap_or_else(|| CANCELLED_MESSAGE.to_string());
        info!(
            session_id = %self.session.id,
            cancelled_files = cancelled.len(),
            reason = %reason,
            "Upload session cancelled"
        );

        self.ctx.persist_session(&self.session).await;
        self.publish(ServerEvent::failed(self.session.id, None, reason));
        let update = ServerEvent::session_updated(&self.session);
        self.ctx
            .broadcaster
            .publish(Room::company(self.session.company_id), update.clone());
        self.publish(update);
        Ok(self.session.clone())
    }

    /// Acknowledge, send the current state, then subscribe. No history is replayed.
    fn join_room(&self, connection: ConnectionHandle) -> bool {
        let broadcaster = &self.ctx.broadcaster;
        if !broadcaster.send_to(&connection, ServerEvent::room_joined(self.room)) {
            return false;
        }
        broadcaster.send_to(&connection, ServerEvent::snapshot(self.snapshot()));
        broadcaster.subscribe(self.room, &connection)
    }

    async fn reap_stale(&mut self, now: DateTime<Utc>, inactivity: chrono::Duration) -> usize {
        if self.session.status.is_terminal() {
            return 0;
        }

        let activity = self.session.updated_at;
        let stale: Vec<u32> = self
            .files
            .iter()
            .filter(|f| f.is_stale(now, inactivity, activity))
            .map(|f| f.progress().file_index)
            .collect();

        let mut reaped = 0;
        for file_index in stale {
            match self.fail_file(file_index, INACTIVITY_FAILURE_MESSAGE).await {
                Ok(_) => reaped += 1,
                Err(e) => debug!(
                    session_id = %self.session.id,
                    file_index = file_index,
                    error = %e,
                    "Stale file could not be failed"
                ),
            }
        }

        if reaped > 0 {
            self.roll_up().await;
        }
        reaped
    }
}

/// Handle used by the registry and the engine to talk to a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub company_id: Uuid,
    pub owner_user_id: Uuid,
    command_tx: mpsc::Sender<SessionCommand>,
    closed: CancellationToken,
}

impl SessionHandle {
    /// Spawn the actor for a freshly created session.
    pub fn spawn(
        ctx: Arc<EngineContext>,
        session: UploadSession,
        rows: Vec<UploadProgress>,
        reservation: ReservationHandle,
    ) -> Self {
        let (tx, rx) = mpsc::channel(ctx.config.actor_mailbox_capacity);
        let closed = CancellationToken::new();
        let window = ctx.config.speed_sample_window;

        let handle = Self {
            session_id: session.id,
            company_id: session.company_id,
            owner_user_id: session.owner_user_id,
            command_tx: tx,
            closed: closed.clone(),
        };

        let actor = SessionActor {
            room: Room::upload_session(session.id),
            files: rows
                .into_iter()
                .map(|row| FileTracker::new(row, window))
                .collect(),
            session,
            reservation,
            ctx,
            closed,
        };
        tokio::spawn(actor.run(rx));

        handle
    }

    /// Fires once the session reaches a terminal state. Chunk workers select on it to
    /// stop early.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, AppError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| AppError::Unavailable("Session actor unavailable".to_string()))?;
        rx.await
            .map_err(|_| AppError::Unavailable("Session response channel closed".to_string()))
    }

    pub async fn record_chunk(
        &self,
        file_index: u32,
        chunk_index: u32,
        bytes: u64,
        total_chunks: u32,
    ) -> Result<ChunkReceipt, AppError> {
        self.request(|response| SessionCommand::RecordChunk {
            file_index,
            chunk_index,
            bytes,
            total_chunks,
            response,
        })
        .await?
    }

    pub async fn complete_file(&self, file_index: u32) -> Result<UploadProgress, AppError> {
        self.request(|response| SessionCommand::CompleteFile {
            file_index,
            response,
        })
        .await?
    }

    pub async fn fail_file(
        &self,
        file_index: u32,
        error: String,
    ) -> Result<UploadProgress, AppError> {
        self.request(|response| SessionCommand::FailFile {
            file_index,
            error,
            response,
        })
        .await?
    }

    pub async fn add_file(&self, entry: FileManifestEntry) -> Result<UploadProgress, AppError> {
        self.request(|response| SessionCommand::AddFile { entry, response })
            .await?
    }

    pub async fn cancel(&self, reason: Option<String>) -> Result<UploadSession, AppError> {
        self.request(|response| SessionCommand::Cancel { reason, response })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, AppError> {
        self.request(|response| SessionCommand::Snapshot { response })
            .await
    }

    pub async fn join_room(&self, connection: ConnectionHandle) -> Result<bool, AppError> {
        self.request(|response| SessionCommand::JoinRoom {
            connection,
            response,
        })
        .await
    }

    pub async fn reap_stale(
        &self,
        now: DateTime<Utc>,
        inactivity: chrono::Duration,
    ) -> Result<usize, AppError> {
        self.request(|response| SessionCommand::ReapStale {
            now,
            inactivity,
            response,
        })
        .await
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown).await;
    }
}
