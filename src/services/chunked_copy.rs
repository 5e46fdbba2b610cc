//! Chunked (multipart) server-side copy for large objects.
//!
//! initiate → copy each byte range in order → complete. A failure after the
//! session is open aborts it before the error is returned, so no half-written
//! session is left behind at the store.

use super::object_manager::ObjectManager;
use crate::{
    client::ObjectStoreClient,
    config::MAX_COPY_PARTS,
    errors::{OpsError, OpsResult},
    models::{
        address::ObjectAddress,
        multipart::{CopyPart, MultipartSession},
    },
};
use tracing::{debug, info, warn};

/// Number of `part_size` ranges needed to cover `object_size` bytes.
pub fn part_count(object_size: u64, part_size: u64) -> u64 {
    if part_size == 0 {
        return 0;
    }
    object_size.div_ceil(part_size)
}

/// Split `[0, object_size)` into contiguous inclusive ranges of `part_size`
/// bytes, the last one ending at `object_size - 1`. Part numbers start at 1.
///
/// Ranges are produced lazily. Yields nothing for an empty object or a zero
/// part size, and stops before a part number would overflow `u32`.
pub fn plan_parts(object_size: u64, part_size: u64) -> impl Iterator<Item = CopyPart> {
    (0..part_count(object_size, part_size)).map_while(move |index| {
        let part_number = u32::try_from(index + 1).ok()?;
        let first_byte = index * part_size;
        let last_byte = first_byte.saturating_add(part_size - 1).min(object_size - 1);
        Some(CopyPart {
            part_number,
            first_byte,
            last_byte,
            e_tag: None,
        })
    })
}

impl<C: ObjectStoreClient + ?Sized> ObjectManager<C> {
    /// Copy `source` (of `object_size` bytes) to `dest` part by part.
    ///
    /// Parts are copied strictly one after another in part-number order.
    /// A plan of more than `MAX_COPY_PARTS` parts is refused before the
    /// session is opened. Returns the completed session.
    pub async fn copy_in_parts(
        &self,
        source: &ObjectAddress,
        dest: &ObjectAddress,
        object_size: u64,
    ) -> OpsResult<MultipartSession> {
        if self.policy.part_size == 0 {
            return Err(OpsError::invalid_argument("part size must be positive"));
        }
        if object_size == 0 {
            return Err(OpsError::invalid_argument(
                "a chunked copy needs at least one byte",
            ));
        }
        let parts = part_count(object_size, self.policy.part_size);
        if parts > u64::from(MAX_COPY_PARTS) {
            return Err(OpsError::invalid_argument(format!(
                "copying {} bytes in {}-byte parts needs {} parts, more than the {} allowed",
                object_size, self.policy.part_size, parts, MAX_COPY_PARTS
            )));
        }

        let upload_id = self.client.initiate_multipart_copy(dest).await?;
        debug!(%source, %dest, upload_id = %upload_id, object_size, "initiated chunked copy");
        let mut session = MultipartSession::new(dest.clone(), upload_id);

        match self.run_session(source, &mut session, object_size).await {
            Ok(()) => Ok(session),
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_copy(&session.destination, &session.upload_id)
                    .await
                {
                    warn!(
                        upload_id = %session.upload_id,
                        dest = %session.destination,
                        error = %abort_err,
                        "failed to abort chunked copy session"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run_session(
        &self,
        source: &ObjectAddress,
        session: &mut MultipartSession,
        object_size: u64,
    ) -> OpsResult<()> {
        for part in plan_parts(object_size, self.policy.part_size) {
            let e_tag = self
                .client
                .copy_part(
                    source,
                    &session.destination,
                    &session.upload_id,
                    part.part_number,
                    part.first_byte,
                    part.last_byte,
                )
                .await?;
            debug!(
                part_number = part.part_number,
                first_byte = part.first_byte,
                last_byte = part.last_byte,
                "copied part"
            );
            session.record(part, e_tag);
        }

        self.client
            .complete_multipart_copy(
                &session.destination,
                &session.upload_id,
                &session.completed_parts(),
            )
            .await?;

        info!(
            %source,
            dest = %session.destination,
            parts = session.parts.len(),
            bytes = session.copied_bytes(),
            "chunked copy complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn assert_covers(parts: &[CopyPart], size: u64, part_size: u64) {
        assert_eq!(parts.first().map(|p| p.first_byte), Some(0));
        assert_eq!(parts.last().map(|p| p.last_byte), Some(size - 1));
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.part_number as usize, i + 1);
            assert!(part.len() <= part_size);
            assert!(part.e_tag.is_none());
        }
        for pair in parts.windows(2) {
            assert_eq!(pair[1].first_byte, pair[0].last_byte + 1);
        }
        assert_eq!(parts.iter().map(CopyPart::len).sum::<u64>(), size);
    }

    #[test]
    fn one_gib_splits_into_full_parts() {
        let size = 1024 * MIB;
        let parts: Vec<_> = plan_parts(size, 5 * MIB).collect();
        assert_eq!(parts.len(), 205);
        assert_covers(&parts, size, 5 * MIB);
        // 1024 MiB is not a multiple of 5 MiB: the tail is 4 MiB.
        assert_eq!(parts.last().unwrap().len(), 4 * MIB);
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let parts: Vec<_> = plan_parts(10 * MIB, 5 * MIB).collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].first_byte, 5 * MIB);
        assert_eq!(parts[1].last_byte, 10 * MIB - 1);
    }

    #[test]
    fn odd_sizes_are_covered_exactly() {
        for size in [1, 2, 4, 5, 6, 99, 100, 101] {
            let parts: Vec<_> = plan_parts(size, 5).collect();
            assert_covers(&parts, size, 5);
        }
    }

    #[test]
    fn empty_inputs_plan_nothing() {
        assert_eq!(plan_parts(0, 5).count(), 0);
        assert_eq!(plan_parts(10, 0).count(), 0);
    }

    #[test]
    fn huge_plans_are_produced_lazily() {
        let size = 1u64 << 30;
        assert_eq!(part_count(size, 1), size);
        let mut plan = plan_parts(size, 1);
        assert_eq!(plan.next().map(|p| (p.part_number, p.first_byte)), Some((1, 0)));
        assert_eq!(plan.next().map(|p| (p.part_number, p.last_byte)), Some((2, 1)));
    }
}
