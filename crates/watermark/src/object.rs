//! Object-storage-backed watermark implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use cdc_extract_object_store::{ObjectStore, TEXT_PLAIN};

use crate::config::WatermarkConfig;
use crate::store::WatermarkStore;

/// Object storage implementation of WatermarkStore trait.
///
/// The watermark is a plain UTF-8 object containing exactly the position
/// text, with no framing. A missing object, or one that is empty after
/// trimming whitespace, means "no watermark yet".
pub struct ObjectWatermarkStore<O> {
    objects: O,
    config: WatermarkConfig,
}

impl<O: ObjectStore> ObjectWatermarkStore<O> {
    /// Create a new store writing to the default watermark key.
    pub fn new(objects: O) -> Self {
        Self::with_config(objects, WatermarkConfig::default())
    }

    pub fn with_config(objects: O, config: WatermarkConfig) -> Self {
        Self { objects, config }
    }

    /// Location of the watermark object, for logging.
    pub fn display_name(&self) -> String {
        self.objects.display_name(&self.config.key)
    }
}

#[async_trait]
impl<O: ObjectStore> WatermarkStore for ObjectWatermarkStore<O> {
    async fn read_current(&self) -> Result<Option<String>> {
        let Some(body) = self.objects.get(&self.config.key).await? else {
            return Ok(None);
        };

        let text = String::from_utf8(body)
            .with_context(|| format!("Watermark {} is not valid UTF-8", self.display_name()))?;
        let position = text.trim();

        if position.is_empty() {
            Ok(None)
        } else {
            Ok(Some(position.to_string()))
        }
    }

    async fn write_new(&self, position: &str) -> Result<()> {
        self.objects
            .put(
                &self.config.key,
                position.as_bytes().to_vec(),
                TEXT_PLAIN,
            )
            .await
            .with_context(|| format!("Failed to write watermark {}", self.display_name()))?;

        tracing::debug!("Stored watermark {position} to {}", self.display_name());
        Ok(())
    }
}
