//! Database models for the object-storage gateway
//!
//! Rows map onto the `item`, `chunk`, `file_server` and `container` tables.
//! Timestamps are persisted as millisecond epoch integers and surfaced as
//! `DateTime<Utc>`.

use crate::error::StoreError;
use crate::storage::transport::ConnectionParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

/// Current time as stored in the database.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

// =============================================================================
// Item
// =============================================================================

/// Lifecycle of an uploaded item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Accepted, chunks still being placed
    Pending,
    /// Every chunk stored and recorded
    Ok,
    /// Placement abandoned
    Fail,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Ok => "ok",
            ItemStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored file, logically one object.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub container_id: String,
    /// Number of chunks; only meaningful once status is `ok`
    pub chunk_count: i64,
    pub status: ItemStatus,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Item {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Item {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            size: row.try_get("size")?,
            container_id: row.try_get("container_id")?,
            chunk_count: row.try_get("chunk_count")?,
            status: row.try_get("status")?,
            created: from_millis(row.try_get("created")?),
            modified: from_millis(row.try_get("modified")?),
        })
    }
}

/// Input for creating a new item
#[derive(Debug, Clone)]
pub struct NewItem {
    pub name: String,
    pub container_id: String,
    pub size: i64,
}

// =============================================================================
// Chunk
// =============================================================================

/// A contiguous byte range of an item stored on exactly one backend.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub item_id: String,
    /// Position in the item (0-indexed)
    pub position: i64,
    pub file_server_id: String,
    /// Path relative to the backend's storage root
    pub file_path: String,
    pub size: i64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Chunk {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Chunk {
            id: row.try_get("id")?,
            item_id: row.try_get("item_id")?,
            position: row.try_get("position")?,
            file_server_id: row.try_get("file_server_id")?,
            file_path: row.try_get("file_path")?,
            size: row.try_get("size")?,
            created: from_millis(row.try_get("created")?),
            modified: from_millis(row.try_get("modified")?),
        })
    }
}

/// Input for recording a placed chunk
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub item_id: String,
    pub position: i64,
    pub file_server_id: String,
    pub file_path: String,
    pub size: i64,
}

// =============================================================================
// Backend (file server)
// =============================================================================

/// Transport family of a registered backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SFTP over SSH
    Ssh,
    /// HTTP storage API
    Api,
    /// Directory on the gateway host
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ssh => "ssh",
            BackendKind::Api => "api",
            BackendKind::Local => "local",
        }
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssh" => Ok(BackendKind::Ssh),
            "api" => Ok(BackendKind::Api),
            "local" => Ok(BackendKind::Local),
            other => Err(StoreError::UnsupportedType(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the connectivity probe run after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BackendStatus {
    Ok,
    Fail,
    Unknown,
}

/// A registered storage backend with its capacity bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct Backend {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub params: ConnectionParams,
    pub total_space: i64,
    pub used_space: i64,
    pub status: BackendStatus,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Backend {
    /// Space still available for new chunks.
    pub fn free_space(&self) -> i64 {
        self.total_space - self.used_space
    }

    /// Copy of this backend with secrets masked, safe to return to callers.
    pub fn hide_credentials(&self) -> Backend {
        Backend {
            params: self.params.hide_credentials(),
            ..self.clone()
        }
    }
}

/// Raw `file_server` row; `params` is decoded according to `type`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BackendRow {
    pub id: String,
    pub name: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub params: String,
    pub total_space: i64,
    pub used_space: i64,
    pub status: BackendStatus,
    pub created: i64,
    pub modified: i64,
}

impl TryFrom<BackendRow> for Backend {
    type Error = StoreError;

    fn try_from(row: BackendRow) -> Result<Self, Self::Error> {
        let kind: BackendKind = row.kind.parse()?;
        let params = ConnectionParams::decode(kind, &row.params)?;
        Ok(Backend {
            id: row.id,
            name: row.name,
            kind,
            params,
            total_space: row.total_space,
            used_space: row.used_space,
            status: row.status,
            created: from_millis(row.created),
            modified: from_millis(row.modified),
        })
    }
}

// =============================================================================
// Container
// =============================================================================

/// Folder-like grouping of items.
#[derive(Debug, Clone, Serialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parent_id: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Container {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Container {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            parent_id: row.try_get("parent_id")?,
            created: from_millis(row.try_get("created")?),
            modified: from_millis(row.try_get("modified")?),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContainer {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("ssh".parse::<BackendKind>().unwrap(), BackendKind::Ssh);
        assert_eq!("api".parse::<BackendKind>().unwrap(), BackendKind::Api);
        assert!(matches!(
            "ftp".parse::<BackendKind>(),
            Err(StoreError::UnsupportedType(t)) if t == "ftp"
        ));
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = now_millis();
        assert_eq!(from_millis(now).timestamp_millis(), now);
    }
}
