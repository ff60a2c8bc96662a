//! Watermark management for cdc-extract
//!
//! A watermark is the last change-stream position whose batch has been
//! durably written. It is the only state the extractor needs to resume
//! after a restart.
//!
//! # Architecture
//!
//! - `WatermarkStore` is the storage contract: read the current value,
//!   write a new one
//! - `ObjectWatermarkStore` keeps the watermark as a plain text object in
//!   any `ObjectStore` (S3 or a local directory)
//! - `WatermarkLoader` / `WatermarkCommitter` split the lifecycle in two:
//!   the value is read exactly once at startup, and every later access is
//!   a commit
//!
//! Positions are handled as opaque strings here; ordering is the caller's
//! concern.
//!
//! A single writer is assumed. Nothing here guards against two extractors
//! committing to the same store concurrently.

mod config;
mod manager;
mod object;
pub mod store;

#[cfg(test)]
mod tests;

pub use config::{WatermarkConfig, DEFAULT_WATERMARK_KEY};
pub use manager::{WatermarkCommitter, WatermarkLoader};
pub use object::ObjectWatermarkStore;
pub use store::WatermarkStore;
