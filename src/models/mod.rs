//! Core data models for the relocation engine and the local store backend.
//!
//! `address`, `metadata` and the session types in `multipart` are what the
//! engine passes around. `bucket`, `object` and the `*Row` types map to the
//! local backend's SQLite tables via `sqlx::FromRow`.

pub mod address;
pub mod bucket;
pub mod metadata;
pub mod multipart;
pub mod object;
