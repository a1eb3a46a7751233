//! `s3://bucket/key` URL handling.

use std::fmt;

use crate::error::{StorageError, StorageResult};

/// A parsed `s3://bucket/key` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    /// Parse an `s3://bucket/key` URL.
    pub fn parse(url: &str) -> StorageResult<Self> {
        let rest = url
            .strip_prefix("s3://")
            .ok_or_else(|| StorageError::invalid_url(format!("not an s3 URL: {url}")))?;

        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| StorageError::invalid_url(format!("missing object key: {url}")))?;

        if bucket.is_empty() || key.is_empty() {
            return Err(StorageError::invalid_url(format!(
                "empty bucket or key: {url}"
            )));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Whether a URL uses the `s3://` scheme. Any other scheme is passed
    /// through to FFmpeg untouched.
    pub fn is_s3_url(url: &str) -> bool {
        url.starts_with("s3://")
    }

    /// File name component of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
