//! PostgreSQL replication slot change source
//!
//! Reads changes over a regular SQL connection (not the replication
//! protocol) with `pg_logical_slot_get_changes`, which consumes what it
//! returns. The slot must already exist and use the `test_decoding` output
//! plugin; this module never creates or drops slots.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_postgres::{Client as PgClient, NoTls};
use tracing::{debug, error, info, warn};

use crate::lsn::Lsn;
use crate::source::{ChangeSource, RawChange};

/// Output plugin whose text format the decoder understands
pub const EXPECTED_PLUGIN: &str = "test_decoding";

/// Change source backed by a logical replication slot
pub struct PgSlotSource {
    /// The PostgreSQL client connection
    pg_client: PgClient,
    /// Name of the replication slot
    slot_name: String,
    /// Whether the slot has been moved up to the resume cursor
    positioned: bool,
}

impl PgSlotSource {
    /// Connects to PostgreSQL and checks that the slot exists
    ///
    /// # Arguments
    /// * `connection_string` - libpq-style connection string or URL
    /// * `slot_name` - Name of the pre-provisioned replication slot
    pub async fn connect(connection_string: &str, slot_name: &str) -> Result<Self> {
        let (pg_client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .context("Failed to connect to PostgreSQL")?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {e}");
            }
        });

        let source = Self::new(pg_client, slot_name);
        source.check_slot().await?;
        Ok(source)
    }

    /// Wraps an already connected client
    pub fn new(pg_client: PgClient, slot_name: &str) -> Self {
        Self {
            pg_client,
            slot_name: slot_name.to_string(),
            positioned: false,
        }
    }

    /// Name of the replication slot
    pub fn slot_name(&self) -> &str {
        &self.slot_name
    }

    /// Verifies the slot exists and returns its confirmed flush position
    async fn check_slot(&self) -> Result<Option<Lsn>> {
        let rows = self
            .pg_client
            .query(
                "SELECT plugin::text, confirmed_flush_lsn::text FROM pg_replication_slots WHERE slot_name = $1",
                &[&self.slot_name],
            )
            .await
            .context("Failed to look up replication slot")?;

        let row = rows.first().ok_or_else(|| {
            anyhow::anyhow!("Replication slot '{}' does not exist", self.slot_name)
        })?;

        let plugin: Option<String> = row.try_get(0)?;
        let confirmed: Option<String> = row.try_get(1)?;

        if plugin.as_deref() != Some(EXPECTED_PLUGIN) {
            warn!(
                "Replication slot '{}' uses plugin {:?}, expected '{}'; records may not decode",
                self.slot_name, plugin, EXPECTED_PLUGIN
            );
        }

        debug!(
            "Slot: {} | Plugin: {:?} | Confirmed flush: {:?}",
            self.slot_name, plugin, confirmed
        );

        confirmed.as_deref().map(Lsn::parse).transpose()
    }

    /// Advances the slot to `cursor` if it is still behind it
    ///
    /// Done once, before the first fetch, so the slot resumes after the
    /// persisted watermark even if it lagged behind it.
    async fn position_slot(&self, cursor: &Lsn) -> Result<()> {
        let confirmed = self.check_slot().await?;

        match confirmed {
            Some(confirmed) if confirmed >= *cursor => {
                debug!(
                    "Slot {} already at {confirmed}, at or past watermark {cursor}",
                    self.slot_name
                );
            }
            _ => {
                info!("Advancing slot {} to watermark {cursor}", self.slot_name);
                self.pg_client
                    .query(
                        "SELECT * FROM pg_replication_slot_advance($1, $2::text::pg_lsn)",
                        &[&self.slot_name, &cursor.as_str()],
                    )
                    .await
                    .context("Failed to advance replication slot")?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ChangeSource for PgSlotSource {
    async fn fetch_since(
        &mut self,
        cursor: Option<&Lsn>,
        limit: Option<u32>,
    ) -> Result<Vec<RawChange>> {
        if !self.positioned {
            if let Some(cursor) = cursor {
                self.position_slot(cursor).await?;
            }
            self.positioned = true;
        }

        // This function consumes changes (they won't be returned again)
        let limit: Option<i32> = limit.map(|n| i32::try_from(n).unwrap_or(i32::MAX));
        let rows = self
            .pg_client
            .query(
                "SELECT lsn::text, xid::text, data FROM pg_logical_slot_get_changes($1, NULL, $2)",
                &[&self.slot_name, &limit],
            )
            .await
            .context("Failed to get changes from replication slot")?;

        // Rows come in commit order, so a row's LSN can be below the cursor
        // even though the slot never returned it before. Never filter here.
        let mut changes = Vec::with_capacity(rows.len());
        for row in rows {
            let lsn: String = row.try_get(0)?;
            changes.push(RawChange {
                lsn: Lsn::parse(&lsn)?,
                xid: row.try_get(1)?,
                data: row.try_get(2)?,
            });
        }

        debug!(
            "Fetched {} changes from slot {}",
            changes.len(),
            self.slot_name
        );
        Ok(changes)
    }
}
