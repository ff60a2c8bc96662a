//! Watermark location configuration.

/// Object key of the watermark, relative to the destination root.
pub const DEFAULT_WATERMARK_KEY: &str = "_watermark.txt";

/// Configuration for the object-backed watermark store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkConfig {
    /// Object key holding the watermark text.
    ///
    /// Lives next to the artifacts so that a destination directory or
    /// bucket prefix is self-contained.
    pub key: String,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_WATERMARK_KEY.to_string(),
        }
    }
}

impl WatermarkConfig {
    /// Create a config with a custom object key.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}
