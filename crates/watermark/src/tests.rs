//! Unit tests for the watermark crate.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use cdc_extract_object_store::testing::MemoryObjectStore;
use cdc_extract_object_store::LocalObjectStore;
use tempfile::TempDir;

use crate::{ObjectWatermarkStore, WatermarkConfig, WatermarkLoader, WatermarkStore};

/// Store that counts reads, to check the load-once lifecycle.
#[derive(Default)]
struct CountingStore {
    value: Mutex<Option<String>>,
    reads: Mutex<usize>,
    writes: Mutex<Vec<String>>,
    fail_writes: bool,
}

#[async_trait]
impl WatermarkStore for CountingStore {
    async fn read_current(&self) -> Result<Option<String>> {
        *self.reads.lock().unwrap() += 1;
        Ok(self.value.lock().unwrap().clone())
    }

    async fn write_new(&self, position: &str) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("injected write failure");
        }
        self.writes.lock().unwrap().push(position.to_string());
        *self.value.lock().unwrap() = Some(position.to_string());
        Ok(())
    }
}

// ============================================================================
// ObjectWatermarkStore Tests
// ============================================================================

#[tokio::test]
async fn test_missing_object_reads_as_absent() {
    let store = ObjectWatermarkStore::new(MemoryObjectStore::new());
    assert_eq!(store.read_current().await.unwrap(), None);
}

#[tokio::test]
async fn test_blank_object_reads_as_absent() {
    let objects = MemoryObjectStore::new();
    objects.insert("_watermark.txt", b"  \n", "text/plain");

    let store = ObjectWatermarkStore::new(objects);
    assert_eq!(store.read_current().await.unwrap(), None);
}

#[tokio::test]
async fn test_read_trims_surrounding_whitespace() {
    let objects = MemoryObjectStore::new();
    objects.insert("_watermark.txt", b"0/16B3748\n", "text/plain");

    let store = ObjectWatermarkStore::new(objects);
    assert_eq!(
        store.read_current().await.unwrap(),
        Some("0/16B3748".to_string())
    );
}

#[tokio::test]
async fn test_write_stores_plain_text_without_framing() {
    let objects = MemoryObjectStore::new();
    let store = ObjectWatermarkStore::new(objects.clone());

    store.write_new("0/ABCD1234").await.unwrap();

    let object = objects.object("_watermark.txt").unwrap();
    assert_eq!(object.body, b"0/ABCD1234");
    assert_eq!(object.content_type, "text/plain");
}

#[tokio::test]
async fn test_custom_key() {
    let objects = MemoryObjectStore::new();
    let store =
        ObjectWatermarkStore::with_config(objects.clone(), WatermarkConfig::with_key("state/lsn"));

    store.write_new("0/10").await.unwrap();

    assert_eq!(objects.keys(), vec!["state/lsn".to_string()]);
    assert_eq!(store.display_name(), "memory://state/lsn");
}

#[tokio::test]
async fn test_invalid_utf8_is_an_error() {
    let objects = MemoryObjectStore::new();
    objects.insert("_watermark.txt", &[0xff, 0xfe], "text/plain");

    let store = ObjectWatermarkStore::new(objects);
    assert!(store.read_current().await.is_err());
}

#[tokio::test]
async fn test_write_failure_is_reported() {
    let objects = MemoryObjectStore::new();
    objects.set_fail_puts(true);

    let store = ObjectWatermarkStore::new(objects);
    let err = store.write_new("0/10").await.unwrap_err();
    assert!(err.to_string().contains("Failed to write watermark"));
}

#[tokio::test]
async fn test_local_directory_roundtrip_survives_reopen() {
    let tmp = TempDir::new().unwrap();

    let store = ObjectWatermarkStore::new(LocalObjectStore::new(tmp.path()));
    store.write_new("0/1949850").await.unwrap();
    drop(store);

    let reopened = ObjectWatermarkStore::new(LocalObjectStore::new(tmp.path()));
    assert_eq!(
        reopened.read_current().await.unwrap(),
        Some("0/1949850".to_string())
    );
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("_watermark.txt")).unwrap(),
        "0/1949850"
    );
}

// ============================================================================
// WatermarkLoader / WatermarkCommitter Tests
// ============================================================================

#[tokio::test]
async fn test_load_reads_exactly_once() {
    let store = Arc::new(CountingStore {
        value: Mutex::new(Some("0/100".to_string())),
        ..Default::default()
    });

    let (initial, mut committer) = WatermarkLoader::new(store.clone()).load().await.unwrap();
    assert_eq!(initial, Some("0/100".to_string()));

    committer.commit("0/200").await.unwrap();
    committer.commit("0/300").await.unwrap();

    assert_eq!(*store.reads.lock().unwrap(), 1);
    assert_eq!(
        *store.writes.lock().unwrap(),
        vec!["0/200".to_string(), "0/300".to_string()]
    );
}

#[tokio::test]
async fn test_committer_tracks_last_committed() {
    let store = CountingStore::default();

    let (initial, mut committer) = WatermarkLoader::new(store).load().await.unwrap();
    assert_eq!(initial, None);
    assert_eq!(committer.last_committed(), None);

    committer.commit("0/10").await.unwrap();
    assert_eq!(committer.last_committed(), Some("0/10"));
    assert_eq!(
        committer.store().value.lock().unwrap().as_deref(),
        Some("0/10")
    );
}

#[tokio::test]
async fn test_failed_commit_keeps_previous_value() {
    let store = CountingStore {
        value: Mutex::new(Some("0/10".to_string())),
        fail_writes: true,
        ..Default::default()
    };

    let (_, mut committer) = WatermarkLoader::new(store).load().await.unwrap();
    assert!(committer.commit("0/20").await.is_err());
    assert_eq!(committer.last_committed(), Some("0/10"));
}
