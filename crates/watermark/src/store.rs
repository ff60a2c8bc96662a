//! Watermark storage trait

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for durable, single-value watermark storage.
///
/// This trait abstracts the storage backend so the same commit protocol
/// works with:
/// - Object storage (`ObjectWatermarkStore` over S3 or a local directory)
/// - Test doubles that record calls
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Read the persisted watermark.
    ///
    /// Returns None if no watermark has been written yet.
    async fn read_current(&self) -> Result<Option<String>>;

    /// Persist a new watermark.
    ///
    /// Must not return `Ok` before the value is durable.
    async fn write_new(&self, position: &str) -> Result<()>;
}

#[async_trait]
impl<T: WatermarkStore + ?Sized> WatermarkStore for Arc<T> {
    async fn read_current(&self) -> Result<Option<String>> {
        (**self).read_current().await
    }

    async fn write_new(&self, position: &str) -> Result<()> {
        (**self).write_new(position).await
    }
}
