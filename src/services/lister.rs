//! Prefix listing with an optional regex filter.

use super::object_manager::ObjectManager;
use crate::{
    client::ObjectStoreClient,
    errors::{OpsError, OpsResult},
};
use regex::Regex;
use tracing::debug;

/// Matches keys that *contain* a match for a regular expression.
///
/// `part-.*\.csv` therefore matches `out.csv/part-00001.csv` even though the
/// pattern does not describe the whole key. Consolidation relies on this.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    regex: Regex,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> OpsResult<Self> {
        let regex = Regex::new(pattern).map_err(|source| OpsError::PatternCompile {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    /// Unanchored search: true when any substring of `key` matches.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

impl<C: ObjectStoreClient + ?Sized> ObjectManager<C> {
    /// Every key under `prefix` (default: the whole bucket), optionally
    /// restricted to keys containing a match for `pattern`.
    ///
    /// Pages through the listing `list_batch_size` keys at a time until the
    /// store reports no continuation; the result is never truncated. The
    /// pattern is compiled before the first store call.
    pub async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        pattern: Option<&str>,
    ) -> OpsResult<Vec<String>> {
        if bucket.is_empty() {
            return Err(OpsError::invalid_argument("bucket is required"));
        }
        let filter = pattern.map(KeyPattern::new).transpose()?;
        let prefix = prefix.unwrap_or("");

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .client
                .list_page(
                    bucket,
                    prefix,
                    continuation.as_deref(),
                    self.policy.list_batch_size,
                )
                .await?;
            pages += 1;

            keys.extend(
                page.keys
                    .into_iter()
                    .filter(|key| filter.as_ref().is_none_or(|f| f.matches(key))),
            );

            match page.next_continuation_token {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        debug!(bucket, prefix, pattern, pages, matched = keys.len(), "listed objects");
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matches_anywhere_in_key() {
        let pattern = KeyPattern::new("abc").unwrap();
        assert!(pattern.matches("xabcx"));
        assert!(pattern.matches("abc"));
        assert!(!pattern.matches("ab-c"));
    }

    #[test]
    fn partition_pattern_matches_nested_part_files() {
        let pattern = KeyPattern::new(r"part-.*\.csv").unwrap();
        assert!(pattern.matches("data/out.csv/part-00001.csv"));
        assert!(pattern.matches("data/out.csv/part-00001-c000.csv.crc"));
        assert!(!pattern.matches("data/out.csv/_SUCCESS"));
        assert!(!pattern.matches("data/out.csv/part-00001.parquet"));
    }

    #[test]
    fn anchors_keep_their_meaning() {
        let pattern = KeyPattern::new("^logs/").unwrap();
        assert!(pattern.matches("logs/a"));
        assert!(!pattern.matches("old/logs/a"));
    }

    #[test]
    fn malformed_pattern_is_reported() {
        let err = KeyPattern::new("part-(").unwrap_err();
        assert!(matches!(err, OpsError::PatternCompile { ref pattern, .. } if pattern == "part-("));
    }
}
