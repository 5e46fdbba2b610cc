//! Error types for the store boundary and for the relocation engine.
//!
//! `StorageError` is whatever a store client reports; the engine never
//! reclassifies it and surfaces it through `OpsError::Store`.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("multipart upload `{0}` does not exist")]
    NoSuchUpload(String),
    #[error("invalid part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },
    #[error("byte range {first_byte}-{last_byte} is invalid for an object of {size} bytes")]
    InvalidRange {
        first_byte: u64,
        last_byte: u64,
        size: u64,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Errors raised by store clients other than the local backend.
    #[error("{0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Failures of the list / delete / move / consolidate operations.
///
/// Every variant is terminal for the operation that raised it.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid object address `{input}`: {reason}")]
    InvalidAddress { input: String, reason: String },
    #[error("invalid pattern `{pattern}`")]
    PatternCompile {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvariantViolation(String),
    #[error("copy failed: `{destination}` does not exist after copying from `{source_address}`")]
    CopyFailed {
        source_address: String,
        destination: String,
    },
    #[error(
        "copy failed: the size in `{destination}` ({actual} bytes) doesn't match the source object size ({expected} bytes)"
    )]
    SizeMismatch {
        destination: String,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    Store(#[from] StorageError),
}

pub type OpsResult<T> = Result<T, OpsError>;

impl OpsError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
