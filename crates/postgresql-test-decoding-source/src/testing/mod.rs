//! In-memory doubles for driving the extraction loop in tests
//!
//! All doubles are cheap to clone and clones share state, so a test can hand
//! one clone to the loop and inspect the other. A shared [`Journal`] records
//! the order of calls across doubles.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use watermark::WatermarkStore;

use crate::change::ChangeEvent;
use crate::clock::Clock;
use crate::lsn::Lsn;
use crate::materialize::{ArtifactId, BatchMaterializer};
use crate::source::{ChangeSource, RawChange};

/// Ordered log of calls made against the doubles
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

#[derive(Debug, Default)]
struct SourceState {
    pending: VecDeque<RawChange>,
    cursors: Vec<Option<String>>,
    limits: Vec<Option<u32>>,
    failure: Option<String>,
    resumed: bool,
}

/// Change source backed by a queue. Fetching consumes what it returns, like
/// a logical replication slot does.
///
/// The first fetch drops queued records at or before the cursor, the way
/// the slot is advanced to the watermark on resume. Later fetches return
/// whatever is queued, whatever its position.
#[derive(Debug, Clone)]
pub struct VecSource {
    state: Arc<Mutex<SourceState>>,
    journal: Journal,
}

impl VecSource {
    pub fn new(journal: &Journal) -> Self {
        Self {
            state: Arc::default(),
            journal: journal.clone(),
        }
    }

    pub fn push(&self, lsn: &str, xid: &str, data: &str) {
        let change = RawChange {
            lsn: Lsn::parse(lsn).unwrap(),
            xid: xid.to_string(),
            data: data.to_string(),
        };
        self.state.lock().unwrap().pending.push_back(change);
    }

    /// Fail the next fetch with `message`
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    /// Records still waiting to be fetched
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Cursor passed to each fetch, in order
    pub fn cursors(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().cursors.clone()
    }

    /// Limit passed to each fetch, in order
    pub fn limits(&self) -> Vec<Option<u32>> {
        self.state.lock().unwrap().limits.clone()
    }
}

#[async_trait]
impl ChangeSource for VecSource {
    async fn fetch_since(
        &mut self,
        cursor: Option<&Lsn>,
        limit: Option<u32>,
    ) -> Result<Vec<RawChange>> {
        let mut state = self.state.lock().unwrap();
        state.cursors.push(cursor.map(|lsn| lsn.to_string()));
        state.limits.push(limit);

        let label = cursor.map_or_else(|| "start".to_string(), |lsn| lsn.to_string());
        self.journal.record(format!("fetch {label}"));

        if let Some(message) = state.failure.take() {
            anyhow::bail!("{message}");
        }

        if !state.resumed {
            state.resumed = true;
            if let Some(cursor) = cursor {
                state.pending.retain(|change| change.lsn > *cursor);
            }
        }

        let take = limit.map_or(state.pending.len(), |n| state.pending.len().min(n as usize));
        Ok(state.pending.drain(..take).collect())
    }
}

#[derive(Debug, Default)]
struct MaterializerState {
    batches: Vec<Vec<ChangeEvent>>,
    failure: Option<String>,
}

/// Materializer that keeps every stored batch in memory
#[derive(Debug, Clone)]
pub struct RecordingMaterializer {
    state: Arc<Mutex<MaterializerState>>,
    journal: Journal,
}

impl RecordingMaterializer {
    pub fn new(journal: &Journal) -> Self {
        Self {
            state: Arc::default(),
            journal: journal.clone(),
        }
    }

    /// Fail every store with `message` until cleared
    pub fn set_failure(&self, message: Option<&str>) {
        self.state.lock().unwrap().failure = message.map(str::to_string);
    }

    pub fn batches(&self) -> Vec<Vec<ChangeEvent>> {
        self.state.lock().unwrap().batches.clone()
    }
}

#[async_trait]
impl BatchMaterializer for RecordingMaterializer {
    async fn store(&mut self, batch: &[ChangeEvent]) -> Result<ArtifactId> {
        let mut state = self.state.lock().unwrap();
        self.journal.record(format!("store {}", batch.len()));

        if let Some(message) = &state.failure {
            anyhow::bail!("{message}");
        }

        state.batches.push(batch.to_vec());
        let key = format!("batch-{}", state.batches.len());
        Ok(ArtifactId {
            location: format!("memory://{key}"),
            key,
        })
    }
}

#[derive(Debug, Default)]
struct WatermarkState {
    value: Option<String>,
    reads: usize,
    writes: Vec<String>,
    failure: Option<String>,
}

/// Watermark store that counts reads and records writes
#[derive(Debug, Clone)]
pub struct RecordingWatermarkStore {
    state: Arc<Mutex<WatermarkState>>,
    journal: Journal,
}

impl RecordingWatermarkStore {
    pub fn new(journal: &Journal) -> Self {
        Self {
            state: Arc::default(),
            journal: journal.clone(),
        }
    }

    pub fn with_value(journal: &Journal, value: &str) -> Self {
        let store = Self::new(journal);
        store.state.lock().unwrap().value = Some(value.to_string());
        store
    }

    pub fn set_failure(&self, message: Option<&str>) {
        self.state.lock().unwrap().failure = message.map(str::to_string);
    }

    pub fn value(&self) -> Option<String> {
        self.state.lock().unwrap().value.clone()
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }
}

#[async_trait]
impl WatermarkStore for RecordingWatermarkStore {
    async fn read_current(&self) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        self.journal.record("read");
        Ok(state.value.clone())
    }

    async fn write_new(&self, position: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.journal.record(format!("write {position}"));

        if let Some(message) = &state.failure {
            anyhow::bail!("{message}");
        }

        state.value = Some(position.to_string());
        state.writes.push(position.to_string());
        Ok(())
    }
}

#[derive(Debug)]
struct ClockState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
    stop_after: Option<(usize, broadcast::Sender<()>)>,
}

/// Clock that only moves when slept on. Sleeps return immediately.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
    journal: Option<Journal>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now,
                sleeps: Vec::new(),
                stop_after: None,
            })),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    /// Send on `shutdown` once `sleeps` sleeps have completed
    pub fn stop_after(&self, sleeps: usize, shutdown: broadcast::Sender<()>) {
        self.state.lock().unwrap().stop_after = Some((sleeps, shutdown));
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().now
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        if let Some(journal) = &self.journal {
            journal.record(format!("sleep {}ms", duration.as_millis()));
        }

        state.sleeps.push(duration);
        state.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());

        let count = state.sleeps.len();
        if let Some((after, shutdown)) = &state.stop_after {
            if count >= *after {
                let _ = shutdown.send(());
            }
        }
    }
}
