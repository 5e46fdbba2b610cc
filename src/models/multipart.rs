//! Multipart copy sessions, their parts, and the rows the local backend
//! keeps for them.

use super::address::ObjectAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One byte range of a chunked copy.
///
/// `e_tag` stays `None` until the store has copied the range.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CopyPart {
    /// 1-based, strictly increasing within a session.
    pub part_number: u32,

    /// Inclusive start offset in the source object.
    pub first_byte: u64,

    /// Inclusive end offset in the source object.
    pub last_byte: u64,

    pub e_tag: Option<String>,
}

impl CopyPart {
    pub fn len(&self) -> u64 {
        self.last_byte - self.first_byte + 1
    }
}

/// The `(part_number, e_tag)` pair submitted when completing a session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub e_tag: String,
}

/// An open chunked copy towards `destination`.
///
/// Lives for exactly one move of one large object and is consumed by either
/// completion or abort.
#[derive(Clone, Debug)]
pub struct MultipartSession {
    pub destination: ObjectAddress,
    pub upload_id: String,
    pub parts: Vec<CopyPart>,
}

impl MultipartSession {
    pub fn new(destination: ObjectAddress, upload_id: String) -> Self {
        Self {
            destination,
            upload_id,
            parts: Vec::new(),
        }
    }

    /// Record a part the store has finished copying.
    pub fn record(&mut self, mut part: CopyPart, e_tag: String) {
        part.e_tag = Some(e_tag);
        self.parts.push(part);
    }

    /// Ordered completion list. Parts without an ETag are skipped; `record`
    /// never produces one.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.parts
            .iter()
            .filter_map(|part| {
                part.e_tag.as_ref().map(|e_tag| CompletedPart {
                    part_number: part.part_number,
                    e_tag: e_tag.clone(),
                })
            })
            .collect()
    }

    pub fn copied_bytes(&self) -> u64 {
        self.parts.iter().map(CopyPart::len).sum()
    }
}

/// An open multipart session in the local backend. The row is removed once
/// the session is completed or aborted.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket the assembled object will land in.
    pub bucket_id: Uuid,

    /// Destination key.
    pub key: String,

    /// Opaque id handed to the caller.
    pub upload_id: String,

    pub initiated_at: DateTime<Utc>,
}

/// A copied part stored under a session.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    pub id: Uuid,

    /// Reference to `MultipartUpload::id`.
    pub upload_id: Uuid,

    /// Part number (1-based).
    pub part_number: i64,

    pub size_bytes: i64,

    /// MD5 of the part payload.
    pub etag: String,

    pub uploaded_at: DateTime<Utc>,
}
