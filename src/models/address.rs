//! Addresses of the form `scheme://bucket/key`.

use crate::errors::OpsError;
use serde::Serialize;
use std::{fmt, str::FromStr};

/// Scheme used when rendering an address back to text.
pub const DEFAULT_SCHEME: &str = "s3";

/// Uniquely identifies one object in the store.
///
/// Both parts are non-empty once constructed; there are no setters.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectAddress {
    bucket: String,
    key: String,
}

impl ObjectAddress {
    /// Build an address from its parts, rejecting an empty bucket or key.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self, OpsError> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() {
            return Err(OpsError::invalid_argument("bucket must not be empty"));
        }
        if key.is_empty() {
            return Err(OpsError::invalid_argument("key must not be empty"));
        }
        Ok(Self { bucket, key })
    }

    /// Parse `scheme://bucket/key...`.
    ///
    /// This is the only parser in the crate. Whether a failure is fatal is up
    /// to the caller: `delete_object_at` ignores it, everything else
    /// propagates it.
    pub fn parse(input: &str) -> Result<Self, OpsError> {
        let invalid = |reason: &str| OpsError::InvalidAddress {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid("expected `scheme://bucket/key`"))?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(invalid("scheme is missing or malformed"));
        }

        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing object key"))?;
        if bucket.is_empty() {
            return Err(invalid("missing bucket"));
        }
        if key.is_empty() {
            return Err(invalid("missing object key"));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last `/`-separated component of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Extension of the last key component, if it has a non-empty one.
    pub fn extension(&self) -> Option<&str> {
        match self.file_name().rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => Some(ext),
            _ => None,
        }
    }
}

impl FromStr for ObjectAddress {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", DEFAULT_SCHEME, self.bucket, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_keys() {
        let addr = ObjectAddress::parse("s3://bucket/data/out.csv/part-00001.csv").unwrap();
        assert_eq!(addr.bucket(), "bucket");
        assert_eq!(addr.key(), "data/out.csv/part-00001.csv");
        assert_eq!(addr.file_name(), "part-00001.csv");
    }

    #[test]
    fn accepts_other_schemes() {
        let addr: ObjectAddress = "local://my-bucket/a".parse().unwrap();
        assert_eq!(addr.bucket(), "my-bucket");
        assert_eq!(addr.key(), "a");
        assert_eq!(addr.to_string(), "s3://my-bucket/a");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for input in [
            "",
            "bucket/key",
            "s3://",
            "s3://bucket",
            "s3://bucket/",
            "s3:///key",
            "://bucket/key",
            "s 3://bucket/key",
        ] {
            let err = ObjectAddress::parse(input).unwrap_err();
            assert!(
                matches!(err, OpsError::InvalidAddress { .. }),
                "{input:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn extension_comes_from_last_component() {
        let with_ext = ObjectAddress::new("b", "data/out.csv").unwrap();
        assert_eq!(with_ext.extension(), Some("csv"));

        let dotted_dir = ObjectAddress::new("b", "data.v2/out").unwrap();
        assert_eq!(dotted_dir.extension(), None);

        let trailing_dot = ObjectAddress::new("b", "data/out.").unwrap();
        assert_eq!(trailing_dot.extension(), None);

        let trailing_slash = ObjectAddress::new("b", "data/out.csv/").unwrap();
        assert_eq!(trailing_slash.extension(), None);
    }

    #[test]
    fn new_rejects_empty_parts() {
        assert!(matches!(
            ObjectAddress::new("", "k"),
            Err(OpsError::InvalidArgument(_))
        ));
        assert!(matches!(
            ObjectAddress::new("b", ""),
            Err(OpsError::InvalidArgument(_))
        ));
    }
}
