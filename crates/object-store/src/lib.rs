//! Object storage abstraction for writing to a local directory or S3
//!
//! This crate provides a small, uniform interface for the two things the
//! extractor needs from object storage: put an object under a key and read
//! one back (or learn that it does not exist).
//!
//! # Destination Types
//!
//! - **Local**: a directory on the local filesystem; keys become relative paths
//! - **S3**: a bucket plus optional key prefix (AWS S3 or an S3-compatible
//!   server such as MinIO)
//!
//! # Example
//!
//! ```ignore
//! use cdc_extract_object_store::{Destination, ObjectStore, S3Settings};
//!
//! let destination = Destination::parse("s3://raw/inc")?;
//! let store = destination.open(&S3Settings::default(), false).await?;
//! store.put("_watermark.txt", b"0/16B3748".to_vec(), "text/plain").await?;
//! ```

mod local;
mod s3;

#[doc(hidden)]
pub mod testing;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub use local::LocalObjectStore;
pub use s3::{S3ObjectStore, S3Settings, DEFAULT_REGION};

/// Content type used for plain text objects
pub const TEXT_PLAIN: &str = "text/plain";

/// Content type used for CSV objects
pub const TEXT_CSV: &str = "text/csv";

/// Minimal object storage operations.
///
/// Keys are relative to the store's root (a directory or a bucket prefix)
/// and always use `/` as the separator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Durably store `body` under `key`, replacing any existing object.
    ///
    /// Returns only after the backend has acknowledged the write.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Read the object under `key`.
    ///
    /// Returns `None` if no such object exists.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Whether an object exists under `key`
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Human readable location of `key`, for logging
    fn display_name(&self, key: &str) -> String;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        (**self).put(key, body, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    fn display_name(&self, key: &str) -> String {
        (**self).display_name(key)
    }
}

/// Where extracted objects are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Local directory
    Local(PathBuf),
    /// S3 bucket with an optional key prefix (empty for the bucket root)
    S3 { bucket: String, prefix: String },
}

impl Destination {
    /// Parse a string into a Destination, auto-detecting the backend
    ///
    /// - `s3://bucket` or `s3://bucket/prefix` -> S3
    /// - Everything else -> Local
    pub fn parse(uri: &str) -> Result<Self> {
        if uri.starts_with("s3://") {
            let (bucket, prefix) = parse_s3_uri(uri)?;
            Ok(Destination::S3 { bucket, prefix })
        } else if uri.trim().is_empty() {
            anyhow::bail!("Destination must not be empty");
        } else {
            Ok(Destination::Local(PathBuf::from(uri)))
        }
    }

    /// Open the backend for this destination
    ///
    /// With `create_bucket` the S3 bucket is created when missing; it has no
    /// effect on a local directory.
    pub async fn open(
        &self,
        settings: &S3Settings,
        create_bucket: bool,
    ) -> Result<Arc<dyn ObjectStore>> {
        match self {
            Destination::Local(path) => {
                if create_bucket {
                    tracing::warn!(
                        "Bucket creation has no effect for local destination {}",
                        path.display()
                    );
                }
                Ok(Arc::new(LocalObjectStore::new(path.clone())))
            }
            Destination::S3 { bucket, prefix } => {
                let store = S3ObjectStore::connect(bucket, prefix, settings).await?;
                if create_bucket {
                    store.ensure_bucket().await?;
                }
                Ok(Arc::new(store))
            }
        }
    }

    /// Get a display name for logging
    pub fn display_name(&self) -> String {
        match self {
            Destination::Local(path) => path.display().to_string(),
            Destination::S3 { bucket, prefix } if prefix.is_empty() => format!("s3://{bucket}"),
            Destination::S3 { bucket, prefix } => format!("s3://{bucket}/{prefix}"),
        }
    }
}

/// Parse S3 URI in the format: s3://bucket[/prefix]
///
/// A trailing `/` on the prefix is removed.
pub fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let uri = uri
        .strip_prefix("s3://")
        .context("S3 URI must start with 's3://'")?;

    let (bucket, prefix) = match uri.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
        None => (uri, ""),
    };

    if bucket.is_empty() {
        anyhow::bail!("S3 URI must be in format 's3://bucket/prefix'");
    }

    Ok((bucket.to_string(), prefix.to_string()))
}

/// Join a store prefix and a relative key with a single `/`
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let key = key.trim_start_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}
