//! An object row in the local backend.

use super::metadata::ObjectMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for one stored payload. The bytes themselves live on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// MD5 of the payload, or `{md5-of-part-md5s}-{n}` for objects assembled
    /// from a multipart copy.
    pub etag: Option<String>,

    pub last_modified: DateTime<Utc>,

    /// Soft-delete marker; deleted rows are invisible to every read path.
    pub is_deleted: bool,
}

impl Object {
    pub fn metadata(&self) -> ObjectMetadata {
        ObjectMetadata::present(self.size_bytes.max(0) as u64)
    }
}
