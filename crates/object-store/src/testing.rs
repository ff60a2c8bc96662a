//! In-memory object store for tests

use crate::ObjectStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Object store that keeps objects in a shared in-memory map.
///
/// Clones share the same map. Writes can be made to fail to exercise
/// storage error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    fail_puts: Arc<Mutex<bool>>,
}

/// An object held by [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail (or succeed again)
    pub fn set_fail_puts(&self, fail: bool) {
        *self.fail_puts.lock().unwrap() = fail;
    }

    /// Sorted list of stored keys
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Object body decoded as UTF-8
    pub fn text(&self, key: &str) -> Option<String> {
        self.object(key)
            .map(|object| String::from_utf8_lossy(&object.body).into_owned())
    }

    /// Insert an object directly, bypassing failure injection
    pub fn insert(&self, key: &str, body: &[u8], content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
            },
        );
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        if *self.fail_puts.lock().unwrap() {
            anyhow::bail!("injected put failure for {key}");
        }
        self.insert(key, &body, content_type);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.object(key).map(|object| object.body))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    fn display_name(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}
