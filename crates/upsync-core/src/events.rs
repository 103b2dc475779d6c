//! Realtime event contract
//!
//! Events pushed to websocket subscribers and the messages clients may send back. Every
//! frame is a JSON object `{"event": <name>, "data": {...}}` with camelCase fields.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{
    AccessType, FileAssociation, ProcessingStatus, SessionSnapshot, SessionStatus, ShareTarget,
    UploadProgress, UploadSession,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    UploadSession,
    Company,
    Chatroom,
    Thread,
}

impl Display for RoomType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RoomType::UploadSession => write!(f, "upload_session"),
            RoomType::Company => write!(f, "company"),
            RoomType::Chatroom => write!(f, "chatroom"),
            RoomType::Thread => write!(f, "thread"),
        }
    }
}

impl FromStr for RoomType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload_session" => Ok(RoomType::UploadSession),
            "company" => Ok(RoomType::Company),
            "chatroom" => Ok(RoomType::Chatroom),
            "thread" => Ok(RoomType::Thread),
            _ => Err(anyhow::anyhow!("Invalid room type: {}", s)),
        }
    }
}

/// A broadcast topic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_type: RoomType,
    pub id: Uuid,
}

impl Room {
    pub fn new(room_type: RoomType, id: Uuid) -> Self {
        Self { room_type, id }
    }

    pub fn upload_session(id: Uuid) -> Self {
        Self::new(RoomType::UploadSession, id)
    }

    pub fn company(id: Uuid) -> Self {
        Self::new(RoomType::Company, id)
    }

    pub fn chatroom(id: Uuid) -> Self {
        Self::new(RoomType::Chatroom, id)
    }

    pub fn thread(id: Uuid) -> Self {
        Self::new(RoomType::Thread, id)
    }
}

impl From<ShareTarget> for Room {
    fn from(target: ShareTarget) -> Self {
        match target {
            ShareTarget::Chatroom(id) => Room::chatroom(id),
            ShareTarget::Thread(id) => Room::thread(id),
        }
    }
}

impl Display for Room {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.room_type, self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadProgress {
    pub session_id: Uuid,
    pub file_index: u32,
    pub file_name: String,
    pub progress: u8,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub upload_speed: u64,
    pub estimated_time_remaining: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadCompleted {
    pub session_id: Uuid,
    pub file_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadFailed {
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessed {
    pub file_id: Uuid,
    pub status: ProcessingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomAck {
    pub room_type: RoomType,
    pub room_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionUpdated {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub completed_files: u32,
    pub failed_files: u32,
    pub total_files: u32,
    pub uploaded_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileShared {
    pub file_id: Uuid,
    pub room_type: RoomType,
    pub room_id: Uuid,
    pub access_type: AccessType,
    pub shared_by: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventError {
    pub code: String,
    pub message: String,
}

/// Events delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    FileUploadProgress(FileUploadProgress),
    FileUploadCompleted(FileUploadCompleted),
    FileUploadFailed(FileUploadFailed),
    FileProcessed(FileProcessed),
    RoomJoined(RoomAck),
    RoomLeft(RoomAck),
    UploadSessionSnapshot(SessionSnapshot),
    UploadSessionUpdated(UploadSessionUpdated),
    FileShared(FileShared),
    Error(EventError),
    Pong,
}

impl ServerEvent {
    pub fn progress(row: &UploadProgress) -> Self {
        ServerEvent::FileUploadProgress(FileUploadProgress {
            session_id: row.session_id,
            file_index: row.file_index,
            file_name: row.file_name.clone(),
            progress: row.progress_percentage,
            bytes_uploaded: row.bytes_uploaded,
            total_bytes: row.total_bytes,
            upload_speed: row.upload_speed_bytes_per_sec,
            estimated_time_remaining: row.estimated_seconds_remaining,
        })
    }

    pub fn completed(row: &UploadProgress, file_id: Uuid, download_url: String) -> Self {
        ServerEvent::FileUploadCompleted(FileUploadCompleted {
            session_id: row.session_id,
            file_id,
            file_name: row.file_name.clone(),
            file_size: row.total_bytes,
            download_url,
        })
    }

    pub fn failed(session_id: Uuid, file_name: Option<String>, error: impl Into<String>) -> Self {
        ServerEvent::FileUploadFailed(FileUploadFailed {
            session_id,
            file_name,
            error: error.into(),
        })
    }

    pub fn processed(file_id: Uuid, status: ProcessingStatus) -> Self {
        ServerEvent::FileProcessed(FileProcessed { file_id, status })
    }

    pub fn room_joined(room: Room) -> Self {
        ServerEvent::RoomJoined(RoomAck {
            room_type: room.room_type,
            room_id: room.id,
        })
    }

    pub fn room_left(room: Room) -> Self {
        ServerEvent::RoomLeft(RoomAck {
            room_type: room.room_type,
            room_id: room.id,
        })
    }

    pub fn snapshot(snapshot: SessionSnapshot) -> Self {
        ServerEvent::UploadSessionSnapshot(snapshot)
    }

    pub fn session_updated(session: &UploadSession) -> Self {
        ServerEvent::UploadSessionUpdated(UploadSessionUpdated {
            session_id: session.id,
            status: session.status,
            completed_files: session.completed_files,
            failed_files: session.failed_files,
            total_files: session.total_files,
            uploaded_bytes: session.uploaded_bytes,
        })
    }

    pub fn shared(association: &FileAssociation) -> Self {
        let room = Room::from(association.target);
        ServerEvent::FileShared(FileShared {
            file_id: association.file_id,
            room_type: room.room_type,
            room_id: room.id,
            access_type: association.access_type,
            shared_by: association.shared_by,
        })
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error(EventError {
            code: code.into(),
            message: message.into(),
        })
    }

    /// Wire name of the event, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::FileUploadProgress(_) => "file_upload_progress",
            ServerEvent::FileUploadCompleted(_) => "file_upload_completed",
            ServerEvent::FileUploadFailed(_) => "file_upload_failed",
            ServerEvent::FileProcessed(_) => "file_processed",
            ServerEvent::RoomJoined(_) => "room_joined",
            ServerEvent::RoomLeft(_) => "room_left",
            ServerEvent::UploadSessionSnapshot(_) => "upload_session_snapshot",
            ServerEvent::UploadSessionUpdated(_) => "upload_session_updated",
            ServerEvent::FileShared(_) => "file_shared",
            ServerEvent::Error(_) => "error",
            ServerEvent::Pong => "pong",
        }
    }
}

/// Messages accepted from websocket clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom(RoomAck),
    LeaveRoom(RoomAck),
    Ping,
}

impl RoomAck {
    pub fn room(&self) -> Room {
        Room::new(self.room_type, self.room_id)
    }
}
