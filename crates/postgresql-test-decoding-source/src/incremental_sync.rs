//! Watermark-driven incremental extraction loop
//!
//! Each cycle polls the change source from the current cursor, decodes the
//! returned records, stores the decodable ones as one artifact and only
//! then advances the watermark to the highest position committed so far.
//! Cycles run strictly one after another; the loop only waits at the sleep
//! between cycles, which is also the only place a stop signal is honoured.
//!
//! Delivery is at-least-once with one caveat inherited from the source:
//! fetching consumes. If the process dies after a fetch and before the
//! watermark commit, the records of that fetch are gone from the slot and
//! were never stored. A crash after the artifact is stored but before the
//! commit leaves an artifact whose records may be fetched again only if the
//! slot still has them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};
use watermark::{WatermarkCommitter, WatermarkLoader, WatermarkStore};

use crate::change::ChangeEvent;
use crate::clock::Clock;
use crate::error::{ExtractError, Result};
use crate::lsn::Lsn;
use crate::materialize::{ArtifactId, BatchMaterializer};
use crate::source::ChangeSource;

/// Default time between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Extraction loop settings, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Wait between the end of one cycle and the start of the next
    pub poll_interval: Duration,
    /// Maximum records per fetch; `None` takes everything pending
    pub batch_limit: Option<u32>,
    /// Run a single cycle and return
    pub once: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_limit: None,
            once: false,
        }
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Polling,
    Materializing,
    Advancing,
    Sleeping,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Starting => "starting",
            LoopState::Polling => "polling",
            LoopState::Materializing => "materializing",
            LoopState::Advancing => "advancing",
            LoopState::Sleeping => "sleeping",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing decodable was fetched; nothing was written
    Idle { fetched: usize },
    /// A batch was stored and the watermark advanced
    Committed {
        artifact: ArtifactId,
        watermark: Lsn,
        events: usize,
        fetched: usize,
    },
}

/// Counters over the lifetime of a loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub idle_cycles: u64,
    /// Idle cycles since the last committed batch
    pub consecutive_idle_cycles: u64,
    pub artifacts: u64,
    pub events: u64,
}

/// Polls a change source and commits batches to storage
pub struct ExtractionLoop<S, M, W> {
    config: LoopConfig,
    source: S,
    materializer: M,
    watermark: WatermarkCommitter<W>,
    clock: Arc<dyn Clock>,
    cursor: Option<Lsn>,
    state: LoopState,
    stats: LoopStats,
}

impl<S, M, W> ExtractionLoop<S, M, W>
where
    S: ChangeSource,
    M: BatchMaterializer,
    W: WatermarkStore,
{
    /// Read the watermark (the only read in the loop's lifetime) and pick
    /// the initial cursor
    pub async fn start(
        config: LoopConfig,
        source: S,
        materializer: M,
        watermark_store: W,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (initial, watermark) = WatermarkLoader::new(watermark_store)
            .load()
            .await
            .map_err(ExtractError::Watermark)?;

        let cursor = initial
            .map(|value| {
                Lsn::parse(&value).map_err(|e| ExtractError::InvalidWatermark {
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()?;

        match &cursor {
            Some(lsn) => info!("Resuming from LSN: {lsn}"),
            None => info!("Starting from the beginning of the slot"),
        }

        Ok(Self {
            config,
            source,
            materializer,
            watermark,
            clock,
            cursor,
            state: LoopState::Starting,
            stats: LoopStats::default(),
        })
    }

    /// Position the next fetch starts after
    pub fn cursor(&self) -> Option<&Lsn> {
        self.cursor.as_ref()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    fn transition(&mut self, next: LoopState) {
        debug!("Extraction loop: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run one poll cycle: fetch, decode, then store and advance if
    /// anything decoded
    ///
    /// Errors are fatal; the batch is neither retried nor dropped silently.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.stats.cycles += 1;
        self.transition(LoopState::Polling);

        let records = self
            .source
            .fetch_since(self.cursor.as_ref(), self.config.batch_limit)
            .await
            .map_err(ExtractError::Source)?;
        let fetched = records.len();

        let mut batch = Vec::new();
        let mut high: Option<Lsn> = None;

        // Every fetched record is new: the source consumes on read. A row
        // below the cursor belongs to a transaction that committed after
        // the one that set the cursor.
        for raw in &records {
            match ChangeEvent::decode(raw) {
                Some(event) => {
                    if high.as_ref().map_or(true, |h| event.lsn > *h) {
                        high = Some(event.lsn.clone());
                    }
                    batch.push(event);
                }
                None => debug!("Skipping non-row record at {}: {}", raw.lsn, raw.data),
            }
        }

        let Some(high) = high else {
            self.stats.idle_cycles += 1;
            self.stats.consecutive_idle_cycles += 1;
            debug!(
                "No row changes in {fetched} fetched records ({} idle cycles in a row)",
                self.stats.consecutive_idle_cycles
            );
            return Ok(CycleOutcome::Idle { fetched });
        };

        // The watermark never moves backwards
        let high = match &self.cursor {
            Some(cursor) if *cursor > high => {
                debug!("Batch ends at {high}, below watermark {cursor}; keeping {cursor}");
                cursor.clone()
            }
            _ => high,
        };

        self.transition(LoopState::Materializing);
        let artifact = self
            .materializer
            .store(&batch)
            .await
            .map_err(ExtractError::Materialize)?;

        self.transition(LoopState::Advancing);
        self.watermark
            .commit(high.as_str())
            .await
            .map_err(ExtractError::Watermark)?;
        self.cursor = Some(high.clone());

        self.stats.artifacts += 1;
        self.stats.events += batch.len() as u64;
        self.stats.consecutive_idle_cycles = 0;

        info!(
            "Committed {} changes to {artifact}, watermark now {high}",
            batch.len()
        );

        Ok(CycleOutcome::Committed {
            artifact,
            watermark: high,
            events: batch.len(),
            fetched,
        })
    }

    /// Poll until a stop signal arrives (or after one cycle in `once`
    /// mode)
    ///
    /// The signal is checked before each cycle and raced against the sleep
    /// between cycles, never during a cycle, so a stored batch is always
    /// followed by its watermark commit.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<LoopStats> {
        loop {
            if stop_requested(&mut shutdown) {
                info!("Received shutdown signal");
                break;
            }

            self.run_cycle().await?;

            if self.config.once {
                break;
            }

            self.transition(LoopState::Sleeping);
            let clock = Arc::clone(&self.clock);
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
                _ = clock.sleep(self.config.poll_interval) => {}
            }
        }

        self.transition(LoopState::Stopped);
        info!(
            "Extraction stopped after {} cycles: {} artifacts, {} changes, last watermark {}",
            self.stats.cycles,
            self.stats.artifacts,
            self.stats.events,
            self.watermark.last_committed().unwrap_or("none")
        );
        Ok(self.stats)
    }
}

/// A pending message, a lagged receiver or a dropped sender all mean stop
fn stop_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        shutdown.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}
