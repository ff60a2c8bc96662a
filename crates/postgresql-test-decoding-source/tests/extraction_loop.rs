//! Extraction loop behaviour against in-memory and local-directory storage

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cdc_extract_object_store::testing::MemoryObjectStore;
use cdc_extract_object_store::LocalObjectStore;
use cdc_extract_postgresql_test_decoding_source::testing::{
    Journal, ManualClock, RecordingMaterializer, RecordingWatermarkStore, VecSource,
};
use cdc_extract_postgresql_test_decoding_source::{
    Clock, CsvMaterializer, CycleOutcome, ExtractError, ExtractionLoop, LoopConfig, Operation,
};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watermark::{ObjectWatermarkStore, WatermarkStore};

/// Initialize logging for tests
fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn manual_clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap())
}

struct Harness {
    journal: Journal,
    source: VecSource,
    materializer: RecordingMaterializer,
    watermarks: RecordingWatermarkStore,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        let journal = Journal::new();
        Self {
            source: VecSource::new(&journal),
            materializer: RecordingMaterializer::new(&journal),
            watermarks: RecordingWatermarkStore::new(&journal),
            clock: manual_clock().with_journal(&journal),
            journal,
        }
    }

    fn with_watermark(value: &str) -> Self {
        let harness = Self::new();
        let watermarks = RecordingWatermarkStore::with_value(&harness.journal, value);
        Self {
            watermarks,
            ..harness
        }
    }

    async fn start(
        &self,
        config: LoopConfig,
    ) -> ExtractionLoop<VecSource, RecordingMaterializer, RecordingWatermarkStore> {
        ExtractionLoop::start(
            config,
            self.source.clone(),
            self.materializer.clone(),
            self.watermarks.clone(),
            Arc::new(self.clock.clone()),
        )
        .await
        .unwrap()
    }
}

// =============================================================================
// Cycle scenarios
// =============================================================================

#[tokio::test]
async fn test_insert_followed_by_transaction_marker() {
    init_logging();
    let harness = Harness::new();
    let mut extraction = harness.start(LoopConfig::default()).await;

    harness.source.push(
        "0/10",
        "501",
        "table pub.cliente: INSERT: id[integer]:1 nome[text]:'Ana'",
    );
    harness.source.push("0/18", "501", "BEGIN 501");

    extraction.run_cycle().await.unwrap();

    let batches = harness.materializer.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);

    let event = &batches[0][0];
    assert_eq!(event.operation, Operation::Insert);
    assert_eq!(event.schema, "pub");
    assert_eq!(event.table, "cliente");
    assert_eq!(event.columns["id"], "1");
    assert_eq!(event.columns["nome"], "Ana");
    assert_eq!(event.columns.len(), 2);

    // Only the decodable record moves the watermark
    assert_eq!(harness.watermarks.writes(), vec!["0/10".to_string()]);
}

#[tokio::test]
async fn test_cycle_without_row_changes_writes_nothing() {
    init_logging();
    let harness = Harness::new();
    let mut extraction = harness.start(LoopConfig::default()).await;

    harness.source.push("0/10", "501", "BEGIN 501");
    harness.source.push("0/18", "501", "COMMIT 501");

    let outcome = extraction.run_cycle().await.unwrap();

    assert_eq!(outcome, CycleOutcome::Idle { fetched: 2 });
    assert!(harness.materializer.batches().is_empty());
    assert!(harness.watermarks.writes().is_empty());
    assert_eq!(harness.journal.entries(), vec!["read", "fetch start"]);
}

#[tokio::test]
async fn test_watermark_written_once_after_store() {
    init_logging();
    let harness = Harness::new();
    let mut extraction = harness.start(LoopConfig::default()).await;

    harness.source.push("0/10", "501", "table pub.t: INSERT: id[integer]:1");
    harness.source.push("0/20", "501", "table pub.t: INSERT: id[integer]:2");
    harness.source.push("0/30", "502", "table pub.t: UPDATE: id[integer]:2");

    extraction.run_cycle().await.unwrap();

    assert_eq!(
        harness.journal.entries(),
        vec!["read", "fetch start", "store 3", "write 0/30"]
    );
    assert_eq!(extraction.cursor().unwrap().as_str(), "0/30");
}

#[tokio::test]
async fn test_delete_carries_only_key_columns() {
    init_logging();
    let harness = Harness::new();
    let mut extraction = harness.start(LoopConfig::default()).await;

    harness
        .source
        .push("0/10", "501", "table pub.cliente: DELETE: id[integer]:1");
    extraction.run_cycle().await.unwrap();

    let event = &harness.materializer.batches()[0][0];
    assert_eq!(event.operation, Operation::Delete);
    assert_eq!(event.columns.len(), 1);
    assert_eq!(event.columns["id"], "1");
}

#[tokio::test]
async fn test_watermark_never_moves_backwards() {
    init_logging();
    let harness = Harness::new();
    let mut extraction = harness.start(LoopConfig::default()).await;

    // Numeric order differs from string order: 0/FF < 0/100
    harness.source.push("0/FF", "1", "table pub.t: INSERT: id[integer]:1");
    extraction.run_cycle().await.unwrap();

    harness.source.push("0/100", "2", "table pub.t: INSERT: id[integer]:2");
    extraction.run_cycle().await.unwrap();

    extraction.run_cycle().await.unwrap();

    harness.source.push("1/0", "3", "table pub.t: INSERT: id[integer]:3");
    extraction.run_cycle().await.unwrap();

    assert_eq!(harness.watermarks.writes(), vec!["0/FF", "0/100", "1/0"]);
    assert_eq!(
        harness.source.cursors(),
        vec![
            None,
            Some("0/FF".to_string()),
            Some("0/100".to_string()),
            Some("0/100".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_late_committing_transaction_is_kept() {
    init_logging();
    let harness = Harness::new();
    let mut extraction = harness.start(LoopConfig::default()).await;

    // Transaction 11 starts after 10 but commits first
    harness.source.push("0/1F0", "11", "BEGIN 11");
    harness.source.push("0/200", "11", "table pub.t: INSERT: id[integer]:2");
    harness.source.push("0/250", "11", "COMMIT 11");
    extraction.run_cycle().await.unwrap();

    harness.source.push("0/F0", "10", "BEGIN 10");
    harness
        .source
        .push("0/100", "10", "table pub.t: UPDATE: id[integer]:1 nome[text]:'Bia'");
    harness.source.push("0/180", "10", "table pub.t: DELETE: id[integer]:3");
    harness.source.push("0/300", "10", "COMMIT 10");
    let outcome = extraction.run_cycle().await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Committed { events: 2, .. }));
    let batches = harness.materializer.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1][0].operation, Operation::Update);
    assert_eq!(batches[1][1].operation, Operation::Delete);
    assert_eq!(harness.watermarks.writes(), vec!["0/200", "0/200"]);
    assert_eq!(harness.watermarks.value().as_deref(), Some("0/200"));
}

// =============================================================================
// Restart
// =============================================================================

#[tokio::test]
async fn test_restart_resumes_after_committed_watermark() {
    init_logging();
    let harness = Harness::with_watermark("0/30");
    let mut extraction = harness.start(LoopConfig::default()).await;

    harness.source.push("0/40", "9", "table pub.t: INSERT: id[integer]:4");
    extraction.run_cycle().await.unwrap();

    assert_eq!(harness.source.cursors(), vec![Some("0/30".to_string())]);
    assert_eq!(harness.watermarks.writes(), vec!["0/40".to_string()]);
}

#[tokio::test]
async fn test_replayed_input_is_not_emitted_twice() -> Result<()> {
    init_logging();
    let tmp = TempDir::new()?;
    let objects = LocalObjectStore::new(tmp.path());
    let lines = [
        ("0/10", "table pub.t: INSERT: id[integer]:1"),
        ("0/20", "table pub.t: INSERT: id[integer]:2"),
    ];

    let journal = Journal::new();
    let clock: Arc<dyn Clock> = Arc::new(manual_clock());

    for run in 0..2 {
        // Same input on every run; resuming skips what was committed
        let source = VecSource::new(&journal);
        for (lsn, data) in lines {
            source.push(lsn, "7", data);
        }

        let mut extraction = ExtractionLoop::start(
            LoopConfig::default(),
            source,
            CsvMaterializer::new(objects.clone(), clock.clone()),
            ObjectWatermarkStore::new(objects.clone()),
            clock.clone(),
        )
        .await?;

        let outcome = extraction.run_cycle().await?;
        if run == 0 {
            assert!(matches!(outcome, CycleOutcome::Committed { events: 2, .. }));
        } else {
            assert_eq!(outcome, CycleOutcome::Idle { fetched: 0 });
        }
    }

    let partition = tmp.path().join("date=20240305");
    assert_eq!(std::fs::read_dir(partition)?.count(), 1);
    Ok(())
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_store_failure_is_fatal_and_keeps_watermark() {
    init_logging();
    let harness = Harness::with_watermark("0/5");
    let mut extraction = harness.start(LoopConfig::default()).await;

    harness.materializer.set_failure(Some("bucket unreachable"));
    harness.source.push("0/10", "1", "table pub.t: INSERT: id[integer]:1");

    let err = extraction.run_cycle().await.unwrap_err();
    assert!(matches!(err, ExtractError::Materialize(_)));
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("bucket unreachable"));

    assert!(harness.watermarks.writes().is_empty());
    assert_eq!(harness.watermarks.value().as_deref(), Some("0/5"));
    assert_eq!(extraction.cursor().unwrap().as_str(), "0/5");
}

#[tokio::test]
async fn test_watermark_failure_does_not_advance_cursor() {
    init_logging();
    let harness = Harness::new();
    let mut extraction = harness.start(LoopConfig::default()).await;

    harness.watermarks.set_failure(Some("write denied"));
    harness.source.push("0/10", "1", "table pub.t: INSERT: id[integer]:1");

    let err = extraction.run_cycle().await.unwrap_err();
    assert!(matches!(err, ExtractError::Watermark(_)));
    assert_eq!(harness.materializer.batches().len(), 1);
    assert!(extraction.cursor().is_none());
}

#[tokio::test]
async fn test_source_failure_stops_run() {
    init_logging();
    let harness = Harness::new();
    let extraction = harness.start(LoopConfig::default()).await;

    harness.source.fail_next("connection reset");
    let (_tx, rx) = broadcast::channel(1);

    let err = extraction.run(rx).await.unwrap_err();
    assert!(matches!(err, ExtractError::Source(_)));
    assert!(harness.clock.sleeps().is_empty());
}

// =============================================================================
// Scheduling and cancellation
// =============================================================================

#[tokio::test]
async fn test_once_runs_single_cycle_without_sleeping() {
    init_logging();
    let harness = Harness::new();
    let config = LoopConfig {
        once: true,
        ..LoopConfig::default()
    };
    let extraction = harness.start(config).await;

    harness.source.push("0/10", "1", "table pub.t: INSERT: id[integer]:1");
    let (_tx, rx) = broadcast::channel(1);

    let stats = extraction.run(rx).await.unwrap();
    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.artifacts, 1);
    assert_eq!(stats.events, 1);
    assert!(harness.clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_stop_signal_observed_between_cycles() {
    init_logging();
    let harness = Harness::new();
    let config = LoopConfig {
        poll_interval: Duration::from_millis(500),
        ..LoopConfig::default()
    };
    let extraction = harness.start(config).await;

    harness.source.push("0/10", "1", "table pub.t: INSERT: id[integer]:1");

    let (tx, rx) = broadcast::channel(1);
    harness.clock.stop_after(2, tx);

    let stats = extraction.run(rx).await.unwrap();

    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.artifacts, 1);
    assert_eq!(stats.idle_cycles, 1);
    assert_eq!(
        harness.clock.sleeps(),
        vec![Duration::from_millis(500), Duration::from_millis(500)]
    );
    assert_eq!(
        harness.journal.entries(),
        vec![
            "read",
            "fetch start",
            "store 1",
            "write 0/10",
            "sleep 500ms",
            "fetch 0/10",
            "sleep 500ms",
        ]
    );
}

#[tokio::test]
async fn test_stop_before_first_cycle() {
    init_logging();
    let harness = Harness::new();
    let extraction = harness.start(LoopConfig::default()).await;

    let (tx, rx) = broadcast::channel(1);
    tx.send(()).unwrap();

    let stats = extraction.run(rx).await.unwrap();
    assert_eq!(stats.cycles, 0);
    assert_eq!(harness.journal.entries(), vec!["read"]);
}

// =============================================================================
// End to end over a local directory
// =============================================================================

#[tokio::test]
async fn test_artifacts_and_watermark_on_disk() -> Result<()> {
    init_logging();
    let tmp = TempDir::new()?;
    let objects = LocalObjectStore::new(tmp.path().join("inc"));
    let clock: Arc<dyn Clock> = Arc::new(manual_clock());

    let journal = Journal::new();
    let source = VecSource::new(&journal);
    source.push(
        "0/16B3748",
        "501",
        "table pub.cliente: INSERT: id[integer]:1 nome[text]:'Ana Maria'",
    );
    source.push("0/16B3790", "501", "COMMIT 501");
    source.push("0/16B37A0", "502", "table pub.cliente: DELETE: id[integer]:1");

    let watermarks = ObjectWatermarkStore::new(objects.clone());
    let mut extraction = ExtractionLoop::start(
        LoopConfig::default(),
        source,
        CsvMaterializer::new(objects.clone(), clock.clone()),
        watermarks,
        clock,
    )
    .await?;

    let outcome = extraction.run_cycle().await?;
    let CycleOutcome::Committed { artifact, watermark, .. } = &outcome else {
        panic!("expected a committed cycle, got {outcome:?}");
    };
    assert_eq!(artifact.key, "date=20240305/cdc_20240305_120000.csv");
    assert_eq!(watermark.as_str(), "0/16B37A0");

    let csv = std::fs::read_to_string(
        tmp.path()
            .join("inc")
            .join("date=20240305")
            .join("cdc_20240305_120000.csv"),
    )?;
    assert_eq!(
        csv,
        "lsn,xid,op,schema,table,col_id,col_nome\n\
         0/16B3748,501,INSERT,pub,cliente,1,Ana Maria\n\
         0/16B37A0,502,DELETE,pub,cliente,1,\n"
    );

    let persisted = std::fs::read_to_string(tmp.path().join("inc").join("_watermark.txt"))?;
    assert_eq!(persisted, "0/16B37A0");

    let reread = ObjectWatermarkStore::new(objects).read_current().await?;
    assert_eq!(reread.as_deref(), Some("0/16B37A0"));
    Ok(())
}

#[tokio::test]
async fn test_same_second_artifacts_get_distinct_names() -> Result<()> {
    init_logging();
    let objects = MemoryObjectStore::new();
    let clock: Arc<dyn Clock> = Arc::new(manual_clock());
    let journal = Journal::new();
    let source = VecSource::new(&journal);

    let mut extraction = ExtractionLoop::start(
        LoopConfig::default(),
        source.clone(),
        CsvMaterializer::new(objects.clone(), clock.clone()),
        ObjectWatermarkStore::new(objects.clone()),
        clock,
    )
    .await?;

    source.push("0/10", "1", "table pub.t: INSERT: id[integer]:1");
    extraction.run_cycle().await?;
    source.push("0/20", "2", "table pub.t: INSERT: id[integer]:2");
    extraction.run_cycle().await?;

    assert_eq!(
        objects.keys(),
        vec![
            "_watermark.txt".to_string(),
            "date=20240305/cdc_20240305_120000.csv".to_string(),
            "date=20240305/cdc_20240305_120000_1.csv".to_string(),
        ]
    );
    assert_eq!(objects.text("_watermark.txt").as_deref(), Some("0/20"));
    Ok(())
}
