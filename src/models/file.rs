//! Represents a user's file: its metadata row and the payloads moving in
//! and out of the service.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Identity of an authenticated user, as resolved by the session layer.
pub type UserId = i64;

/// Descriptor row for one file.
///
/// The row describes content held in the object store; it never holds the
/// bytes themselves.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    /// Assigned at creation, never changes.
    pub id: Uuid,

    /// The user that uploaded the file. Immutable.
    pub owner_id: UserId,

    /// Human-readable name, 1–50 code points.
    pub filename: String,

    /// MIME type fixed at upload time.
    pub content_type: String,

    /// Byte length of the current content. Informational only.
    pub size: i64,

    /// `{owner_id}/{id}`. Internal pointer into the object store.
    #[serde(skip)]
    pub storage_key: String,

    /// Soft-delete flag, only ever goes from false to true.
    pub is_deleted: bool,

    pub upload_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,

    /// Set once, when the record is soft-deleted.
    pub deleted_time: Option<DateTime<Utc>>,

    /// Set when garbage collection removed the retained content.
    #[serde(skip)]
    pub purged_time: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Deterministic object-store key for a record.
    pub fn storage_key_for(owner_id: UserId, id: Uuid) -> String {
        format!("{}/{}", owner_id, id)
    }
}

/// Input to an upload.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
    pub size: i64,
}

/// Bytes plus the descriptive fields a download needs.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
    pub size: i64,
}

/// Paging and filtering for listing a user's files.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ListOptions {
    #[serde(default = "ListOptions::default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    /// Also return soft-deleted records.
    #[serde(default)]
    pub with_deleted: bool,
}

impl ListOptions {
    pub const MAX_LIMIT: u32 = 1000;

    fn default_limit() -> u32 {
        100
    }

    /// Limit clamped to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: Self::default_limit(),
            offset: 0,
            with_deleted: false,
        }
    }
}

/// Body of `POST /api/files/{id}/name`.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_is_owner_slash_id() {
        let id = Uuid::new_v4();
        assert_eq!(FileRecord::storage_key_for(7, id), format!("7/{}", id));
    }

    #[test]
    fn list_options_defaults_and_clamp() {
        let opts: ListOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.limit, 100);
        assert_eq!(opts.offset, 0);
        assert!(!opts.with_deleted);

        let zero = ListOptions { limit: 0, ..opts };
        assert_eq!(zero.effective_limit(), 1);
        let huge = ListOptions { limit: 50_000, ..opts };
        assert_eq!(huge.effective_limit(), ListOptions::MAX_LIMIT);
    }

    #[test]
    fn storage_key_never_serialized() {
        let now = Utc::now();
        let record = FileRecord {
            id: Uuid::new_v4(),
            owner_id: 1,
            filename: "a.txt".into(),
            content_type: "text/plain".into(),
            size: 3,
            storage_key: "1/secret".into(),
            is_deleted: false,
            upload_time: now,
            update_time: now,
            deleted_time: None,
            purged_time: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("storage_key"));
        assert!(!json.contains("1/secret"));
    }
}
