//! Two-phase watermark lifecycle: load once, then commit.

use crate::store::WatermarkStore;

/// Startup half of the watermark lifecycle.
///
/// Owns the store until the watermark has been read. Loading consumes the
/// loader and hands the store over to a [`WatermarkCommitter`], so the
/// persisted value can be read at most once per process.
///
/// # Example
///
/// ```rust,ignore
/// use watermark::{ObjectWatermarkStore, WatermarkLoader};
///
/// let loader = WatermarkLoader::new(ObjectWatermarkStore::new(objects));
/// let (initial, mut committer) = loader.load().await?;
///
/// // ... after a batch has been stored ...
/// committer.commit("0/16B3748").await?;
/// ```
pub struct WatermarkLoader<S> {
    store: S,
}

impl<S: WatermarkStore> WatermarkLoader<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Read the persisted watermark and switch to commit mode.
    ///
    /// Returns the stored position (None if absent) and the committer that
    /// owns the store from now on.
    pub async fn load(self) -> anyhow::Result<(Option<String>, WatermarkCommitter<S>)> {
        let initial = self.store.read_current().await?;

        match &initial {
            Some(position) => tracing::info!("Loaded watermark: {position}"),
            None => tracing::info!("No watermark found, starting from the beginning"),
        }

        let committer = WatermarkCommitter {
            store: self.store,
            last_committed: initial.clone(),
        };
        Ok((initial, committer))
    }
}

/// Commit half of the watermark lifecycle.
///
/// There is no read-modify-write: each commit blindly replaces the stored
/// value, which is only sound with a single active writer.
pub struct WatermarkCommitter<S> {
    store: S,
    last_committed: Option<String>,
}

impl<S: WatermarkStore> WatermarkCommitter<S> {
    /// Durably persist `position` as the new watermark.
    ///
    /// On error the previously committed value is kept as `last_committed`.
    pub async fn commit(&mut self, position: &str) -> anyhow::Result<()> {
        self.store.write_new(position).await?;
        self.last_committed = Some(position.to_string());
        tracing::info!("Watermark updated: {position}");
        Ok(())
    }

    /// The value loaded at startup or most recently committed.
    pub fn last_committed(&self) -> Option<&str> {
        self.last_committed.as_deref()
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}
