//! Promote the single partition file of a job output directory to the
//! output's own key.
//!
//! A job writing `s3://bucket/data/out.csv` leaves its output under
//! `data/out.csv/` as `part-*.csv` files plus markers. When that directory
//! holds exactly one partition, it is moved to `data/out.csv` and the
//! directory is emptied.

use super::object_manager::ObjectManager;
use crate::{
    client::ObjectStoreClient,
    errors::{OpsError, OpsResult},
    models::address::ObjectAddress,
};
use tracing::info;

/// What a successful consolidation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Key of the partition object that was promoted.
    pub promoted_key: String,
    pub size_bytes: u64,
    /// Objects removed from the partition directory afterwards.
    pub removed: usize,
}

/// Directory prefix holding the partitions of `target`.
pub fn partition_prefix(target: &ObjectAddress) -> String {
    format!("{}/", target.key())
}

/// Pattern a partition key has to contain for `target`.
///
/// Fails when the last key component has no extension.
pub fn partition_pattern(target: &ObjectAddress) -> OpsResult<String> {
    let extension = target.extension().ok_or_else(|| {
        OpsError::invalid_argument(format!(
            "`{}` needs to have an extension, e.g. csv or parquet",
            target
        ))
    })?;
    Ok(format!(r"part-.*\.{}", regex::escape(extension)))
}

impl<C: ObjectStoreClient + ?Sized> ObjectManager<C> {
    /// Move the one `part-*.<ext>` object under `<key>/` to `<key>`, then
    /// delete everything left under `<key>/`.
    ///
    /// Zero candidates is `NotFound` and more than one is
    /// `InvariantViolation`; in both cases nothing has been touched. The
    /// cleanup lists the prefix again instead of reusing the first listing,
    /// so objects that appeared in between are removed as well. A failure
    /// during cleanup leaves the promoted object in place and returns the
    /// store error.
    pub async fn consolidate(&self, target: &ObjectAddress) -> OpsResult<ConsolidationReport> {
        let pattern = partition_pattern(target)?;
        let prefix = partition_prefix(target);

        let mut candidates = self
            .list(target.bucket(), Some(&prefix), Some(&pattern))
            .await?;
        let promoted_key = match candidates.len() {
            1 => candidates.remove(0),
            0 => {
                return Err(OpsError::not_found(format!(
                    "no file found to consolidate under `{}`",
                    prefix
                )));
            }
            n => {
                return Err(OpsError::invariant(format!(
                    "only one file is expected to consolidate, found {} under `{}`",
                    n, prefix
                )));
            }
        };

        let source = ObjectAddress::new(target.bucket(), promoted_key.as_str())?;
        let moved = self.move_object(&source, target).await?;
        let removed = self
            .delete_objects_under_prefix(target.bucket(), &prefix)
            .await?;

        info!(
            %target,
            promoted = %promoted_key,
            size_bytes = moved.size_bytes,
            removed,
            "consolidated partition output"
        );
        Ok(ConsolidationReport {
            promoted_key,
            size_bytes: moved.size_bytes,
            removed,
        })
    }

    /// `consolidate` for a `scheme://bucket/key` string; a malformed address
    /// is an error.
    pub async fn consolidate_url(&self, target: &str) -> OpsResult<ConsolidationReport> {
        let target = ObjectAddress::parse(target)?;
        self.consolidate(&target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_uses_escaped_extension() {
        let target = ObjectAddress::new("b", "data/out.csv").unwrap();
        assert_eq!(partition_pattern(&target).unwrap(), r"part-.*\.csv");
        assert_eq!(partition_prefix(&target), "data/out.csv/");

        let odd = ObjectAddress::new("b", "data/out.c+v").unwrap();
        assert_eq!(partition_pattern(&odd).unwrap(), r"part-.*\.c\+v");
    }

    #[test]
    fn missing_extension_is_rejected() {
        let target = ObjectAddress::new("b", "data/out").unwrap();
        let err = partition_pattern(&target).unwrap_err();
        assert!(matches!(err, OpsError::InvalidArgument(ref msg) if msg.contains("extension")));
    }
}
