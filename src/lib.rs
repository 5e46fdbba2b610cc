//! Object relocation and consolidation over an object store.
//!
//! [`ObjectManager`] lists, deletes and moves objects through any
//! [`ObjectStoreClient`], copying large objects part by part, and
//! consolidates a job's single `part-*` output file into the output's own
//! key. [`StorageService`] is a local client backed by SQLite and disk.

pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use client::ObjectStoreClient;
pub use config::{COPY_PART_SIZE, LIST_BATCH_SIZE, MULTIPART_COPY_THRESHOLD, TransferPolicy};
pub use errors::{OpsError, OpsResult, StorageError, StorageResult};
pub use models::{address::ObjectAddress, metadata::ObjectMetadata};
pub use services::{
    consolidation::ConsolidationReport,
    mover::{CopyStrategy, MoveReport},
    object_manager::ObjectManager,
    storage_service::StorageService,
};
