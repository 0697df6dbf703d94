//! Location of a durably stored object.

use std::{fmt, str::FromStr};
use thiserror::Error;

/// Bucket plus key of an object in remote storage.
///
/// Persisted on the video record as `bucket,key`; bucket names cannot
/// contain commas so the first comma is always the separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObjectRef {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object reference `{0}`")]
pub struct InvalidObjectRef(pub String);

impl StorageObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Encode for storage on a video record.
    pub fn encode(&self) -> String {
        format!("{},{}", self.bucket, self.key)
    }
}

impl FromStr for StorageObjectRef {
    type Err = InvalidObjectRef;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.split_once(',') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Self::new(bucket, key))
            }
            _ => Err(InvalidObjectRef(raw.to_string())),
        }
    }
}

impl fmt::Display for StorageObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
