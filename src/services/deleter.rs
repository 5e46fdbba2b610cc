//! Single-object and prefix deletes.

use super::object_manager::ObjectManager;
use crate::{
    client::ObjectStoreClient,
    errors::{OpsError, OpsResult},
    models::address::ObjectAddress,
};
use tracing::{debug, info};

impl<C: ObjectStoreClient + ?Sized> ObjectManager<C> {
    /// Delete `bucket/key` if it exists.
    ///
    /// Returns whether a delete was issued; a missing object is not an error.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> OpsResult<bool> {
        if bucket.is_empty() || key.is_empty() {
            return Err(OpsError::invalid_argument("bucket and key are required"));
        }

        let meta = self.client.get_metadata(bucket, key).await?;
        if !meta.exists {
            debug!(bucket, key, "object already absent, nothing to delete");
            return Ok(false);
        }

        self.client.delete_object(bucket, key).await?;
        debug!(bucket, key, "deleted object");
        Ok(true)
    }

    /// Delete the object at a `scheme://bucket/key` address.
    ///
    /// An address that does not parse is skipped rather than reported; this
    /// is the one call site that treats a parse failure as ignorable.
    pub async fn delete_object_at(&self, address: &str) -> OpsResult<bool> {
        match ObjectAddress::parse(address) {
            Ok(addr) => self.delete_object(addr.bucket(), addr.key()).await,
            Err(err) => {
                debug!(address, error = %err, "skipping delete of unparseable address");
                Ok(false)
            }
        }
    }

    /// Delete every object under `prefix`, one at a time.
    ///
    /// The first failing delete stops the pass and its error is returned;
    /// objects after it are left in place. Returns how many objects were
    /// deleted.
    pub async fn delete_objects_under_prefix(&self, bucket: &str, prefix: &str) -> OpsResult<usize> {
        let keys = self.list(bucket, Some(prefix), None).await?;

        let mut deleted = 0;
        for key in &keys {
            if self.delete_object(bucket, key).await? {
                deleted += 1;
            }
        }

        info!(bucket, prefix, deleted, "deleted objects under prefix");
        Ok(deleted)
    }
}
