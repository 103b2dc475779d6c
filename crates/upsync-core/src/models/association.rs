use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "file_access_type", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessType {
    Public,
    #[default]
    Private,
    Restricted,
}

impl Display for AccessType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AccessType::Public => write!(f, "PUBLIC"),
            AccessType::Private => write!(f, "PRIVATE"),
            AccessType::Restricted => write!(f, "RESTRICTED"),
        }
    }
}

impl FromStr for AccessType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PUBLIC" => Ok(AccessType::Public),
            "PRIVATE" => Ok(AccessType::Private),
            "RESTRICTED" => Ok(AccessType::Restricted),
            _ => Err(anyhow::anyhow!("Invalid access type: {}", s)),
        }
    }
}

/// Where a file is shared.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ShareTarget {
    Chatroom(Uuid),
    Thread(Uuid),
}

impl ShareTarget {
    pub fn chatroom_id(&self) -> Option<Uuid> {
        match self {
            ShareTarget::Chatroom(id) => Some(*id),
            ShareTarget::Thread(_) => None,
        }
    }

    pub fn thread_id(&self) -> Option<Uuid> {
        match self {
            ShareTarget::Thread(id) => Some(*id),
            ShareTarget::Chatroom(_) => None,
        }
    }
}

/// Link between a completed file and a chatroom or thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileAssociation {
    pub id: Uuid,
    pub file_id: Uuid,
    pub target: ShareTarget,
    pub access_type: AccessType,
    pub shared_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl FileAssociation {
    pub fn new(
        file_id: Uuid,
        target: ShareTarget,
        access_type: AccessType,
        shared_by: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_id,
            target,
            access_type,
            shared_by,
            created_at: now,
        }
    }
}
