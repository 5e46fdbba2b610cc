//! A bucket row in the local backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Namespace for objects. The local backend only needs enough of it to map
/// names to ids and directories.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: Uuid,

    /// Unique bucket name; also the directory name under the storage root.
    pub name: String,

    pub created_at: DateTime<Utc>,
}
