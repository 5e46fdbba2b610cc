//! Size and existence of an object as reported by the store.

use serde::{Deserialize, Serialize};

/// Point-in-time view of one object.
///
/// Never cached by the engine: objects may be created or deleted by other
/// writers, so each step that needs the size fetches it again.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Payload length in bytes. Zero when the object does not exist.
    pub size_bytes: u64,

    /// Whether a live object is stored at the address.
    pub exists: bool,
}

impl ObjectMetadata {
    pub fn present(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            exists: true,
        }
    }

    pub fn absent() -> Self {
        Self {
            size_bytes: 0,
            exists: false,
        }
    }
}

/// One page of a prefix listing.
#[derive(Clone, Debug, Default)]
pub struct KeyPage {
    /// Keys in ascending lexicographic order.
    pub keys: Vec<String>,

    /// Token to pass back for the next page; `None` once the listing is done.
    pub next_continuation_token: Option<String>,
}
