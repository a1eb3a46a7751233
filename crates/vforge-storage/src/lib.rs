//! S3-compatible object storage client for the VForge platform.
//!
//! Workers use this crate to localise `s3://bucket/key` inputs into their
//! work directory and to upload produced outputs, either directly with
//! credentials from the environment or as the fallback behind a storage
//! plugin.

pub mod client;
pub mod error;
pub mod location;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use location::S3Location;
