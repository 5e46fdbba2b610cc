//! The capabilities the engine consumes from an object store.
//!
//! Implementations are thin: no retries, no reclassification of failures.
//! `services::storage_service::StorageService` is the local implementation.

use crate::{
    errors::StorageResult,
    models::{
        address::ObjectAddress,
        metadata::{KeyPage, ObjectMetadata},
        multipart::CompletedPart,
    },
};
use async_trait::async_trait;

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Size and existence of `bucket/key`. A missing object is not an error.
    async fn get_metadata(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata>;

    /// One page of keys starting with `prefix`, in ascending order.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<KeyPage>;

    /// Single-request server-side copy.
    async fn copy_object(&self, source: &ObjectAddress, dest: &ObjectAddress)
    -> StorageResult<()>;

    /// Remove `bucket/key`. Removing a missing object succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Open a multipart session targeting `dest` and return its upload id.
    async fn initiate_multipart_copy(&self, dest: &ObjectAddress) -> StorageResult<String>;

    /// Copy the inclusive range `first_byte..=last_byte` of `source` as part
    /// `part_number` of the session. Returns the part's ETag.
    async fn copy_part(
        &self,
        source: &ObjectAddress,
        dest: &ObjectAddress,
        upload_id: &str,
        part_number: u32,
        first_byte: u64,
        last_byte: u64,
    ) -> StorageResult<String>;

    /// Assemble the listed parts, in order, into `dest`.
    async fn complete_multipart_copy(
        &self,
        dest: &ObjectAddress,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()>;

    /// Discard a session and any parts copied under it.
    async fn abort_multipart_copy(&self, dest: &ObjectAddress, upload_id: &str)
    -> StorageResult<()>;
}
