//! Batch materialization: one CSV artifact per non-empty poll cycle

use anyhow::{Context, Result};
use async_trait::async_trait;
use cdc_extract_object_store::{ObjectStore, TEXT_CSV};
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use std::sync::Arc;

use crate::change::ChangeEvent;
use crate::clock::Clock;

/// Fixed leading columns of every artifact
pub const FIXED_COLUMNS: [&str; 5] = ["lsn", "xid", "op", "schema", "table"];

/// Prefix that keeps source column names apart from the fixed columns
pub const SOURCE_COLUMN_PREFIX: &str = "col_";

/// Identifies a stored artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactId {
    /// Object key relative to the destination root
    pub key: String,
    /// Full location, for logging
    pub location: String,
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.location)
    }
}

/// Durably stores an ordered batch of change events as a new artifact.
///
/// Every call must produce a new, uniquely named artifact; existing
/// artifacts are never overwritten or appended to.
#[async_trait]
pub trait BatchMaterializer: Send {
    async fn store(&mut self, batch: &[ChangeEvent]) -> Result<ArtifactId>;
}

/// Produces `date=YYYYMMDD/cdc_YYYYMMDD_HHMMSS.csv` keys.
///
/// A second key for the same second gets a `_N` suffix.
#[derive(Debug, Default)]
pub struct ArtifactNamer {
    last_base: Option<String>,
    repeat: u32,
}

impl ArtifactNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next candidate key for an artifact created at `now`
    pub fn next_key(&mut self, now: DateTime<Utc>) -> String {
        let date = now.format("%Y%m%d");
        let time = now.format("%H%M%S");
        let base = format!("date={date}/cdc_{date}_{time}");

        if self.last_base.as_deref() == Some(base.as_str()) {
            self.repeat += 1;
            format!("{base}_{}.csv", self.repeat)
        } else {
            self.last_base = Some(base.clone());
            self.repeat = 0;
            format!("{base}.csv")
        }
    }
}

/// Encode a batch as CSV.
///
/// Header: the fixed columns, then `col_<name>` for every distinct source
/// column in order of first appearance across the batch. Events without a
/// given column leave that cell empty.
pub fn encode_csv(batch: &[ChangeEvent]) -> Result<Vec<u8>> {
    let source_columns: IndexSet<&str> = batch
        .iter()
        .flat_map(|event| event.columns.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());

    let header = FIXED_COLUMNS
        .iter()
        .map(|name| name.to_string())
        .chain(
            source_columns
                .iter()
                .map(|name| format!("{SOURCE_COLUMN_PREFIX}{name}")),
        );
    writer
        .write_record(header)
        .context("Failed to write CSV header")?;

    for event in batch {
        let fixed = [
            event.lsn.as_str(),
            event.xid.as_str(),
            event.operation.as_str(),
            event.schema.as_str(),
            event.table.as_str(),
        ];
        let values = source_columns
            .iter()
            .map(|name| event.columns.get(*name).map_or("", String::as_str));
        writer
            .write_record(fixed.into_iter().chain(values))
            .with_context(|| format!("Failed to write CSV row for {}", event.lsn))?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV buffer: {}", e.error()))
}

/// Writes each batch as a CSV object under a date-partitioned key.
pub struct CsvMaterializer<O> {
    objects: O,
    clock: Arc<dyn Clock>,
    namer: ArtifactNamer,
}

impl<O: ObjectStore> CsvMaterializer<O> {
    pub fn new(objects: O, clock: Arc<dyn Clock>) -> Self {
        Self {
            objects,
            clock,
            namer: ArtifactNamer::new(),
        }
    }

    /// Pick a key that no existing object uses.
    ///
    /// Covers restarts within the same second, which the namer alone
    /// cannot see.
    async fn fresh_key(&mut self) -> Result<String> {
        let now = self.clock.now();
        loop {
            let key = self.namer.next_key(now);
            if !self.objects.exists(&key).await? {
                return Ok(key);
            }
            tracing::debug!("Artifact {key} already exists, trying next name");
        }
    }
}

#[async_trait]
impl<O: ObjectStore> BatchMaterializer for CsvMaterializer<O> {
    async fn store(&mut self, batch: &[ChangeEvent]) -> Result<ArtifactId> {
        anyhow::ensure!(!batch.is_empty(), "Refusing to materialize an empty batch");

        let body = encode_csv(batch)?;
        let key = self.fresh_key().await?;
        let location = self.objects.display_name(&key);

        self.objects
            .put(&key, body, TEXT_CSV)
            .await
            .with_context(|| format!("Failed to store artifact {location}"))?;

        tracing::info!("Stored {} changes to {location}", batch.len());
        Ok(ArtifactId { key, location })
    }
}
