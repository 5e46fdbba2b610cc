//! Size-adaptive copy with post-copy size verification.

use super::object_manager::ObjectManager;
use crate::{
    client::ObjectStoreClient,
    errors::{OpsError, OpsResult},
    models::{address::ObjectAddress, metadata::ObjectMetadata},
};
use tracing::{debug, info};

/// Which copy path a move took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    SingleRequest,
    Chunked { parts: usize },
}

/// Outcome of a verified move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    pub size_bytes: u64,
    pub strategy: CopyStrategy,
}

impl<C: ObjectStoreClient + ?Sized> ObjectManager<C> {
    /// Copy `source` to `dest` and check the destination size.
    ///
    /// Objects of at least `multipart_threshold` bytes go through the chunked
    /// copy, everything else is a single copy request. The destination is then
    /// fetched again: a missing destination is `CopyFailed`, a size different
    /// from the source is `SizeMismatch`, whatever the copy call reported.
    /// The source is left in place.
    pub async fn move_object(
        &self,
        source: &ObjectAddress,
        dest: &ObjectAddress,
    ) -> OpsResult<MoveReport> {
        if source == dest {
            return Err(OpsError::invalid_argument(format!(
                "source and destination are both `{}`",
                source
            )));
        }

        let src_meta = self.client.get_metadata(source.bucket(), source.key()).await?;
        if !src_meta.exists {
            return Err(OpsError::not_found(format!(
                "{} object not found in {} bucket",
                source.key(),
                source.bucket()
            )));
        }
        let size_bytes = src_meta.size_bytes;

        let strategy = if size_bytes >= self.policy.multipart_threshold && size_bytes > 0 {
            let session = self.copy_in_parts(source, dest, size_bytes).await?;
            CopyStrategy::Chunked {
                parts: session.parts.len(),
            }
        } else {
            self.client.copy_object(source, dest).await?;
            CopyStrategy::SingleRequest
        };
        debug!(%source, %dest, ?strategy, "copy issued");

        let dest_meta = self.client.get_metadata(dest.bucket(), dest.key()).await?;
        verify_copy(source, dest, size_bytes, dest_meta)?;

        info!(%source, %dest, size_bytes, ?strategy, "moved object");
        Ok(MoveReport {
            size_bytes,
            strategy,
        })
    }

    /// `move_object` for `scheme://bucket/key` strings. Either address failing
    /// to parse is an error.
    pub async fn move_object_url(&self, source: &str, dest: &str) -> OpsResult<MoveReport> {
        let source = ObjectAddress::parse(source)?;
        let dest = ObjectAddress::parse(dest)?;
        self.move_object(&source, &dest).await
    }
}

fn verify_copy(
    source: &ObjectAddress,
    dest: &ObjectAddress,
    expected: u64,
    dest_meta: ObjectMetadata,
) -> OpsResult<()> {
    if !dest_meta.exists {
        return Err(OpsError::CopyFailed {
            source_address: source.to_string(),
            destination: dest.to_string(),
        });
    }
    if dest_meta.size_bytes != expected {
        return Err(OpsError::SizeMismatch {
            destination: dest.to_string(),
            expected,
            actual: dest_meta.size_bytes,
        });
    }
    Ok(())
}
