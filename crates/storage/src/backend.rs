//! Namespaced key-value persistence.
//!
//! Each logical store owns one namespace and persists its whole table as a
//! single JSON object (`{ key: record }`), mirroring how browser extension
//! storage holds one value per top-level key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;

/// Persistence backend for store tables.
#[async_trait]
pub trait KvBackend: Send + Sync + core::fmt::Debug {
    /// Load the table stored under `namespace`, if any.
    async fn load(&self, namespace: &str) -> Result<Option<Value>, StorageError>;

    /// Replace the table stored under `namespace`.
    async fn save(&self, namespace: &str, data: Value) -> Result<(), StorageError>;

    /// Drop the table stored under `namespace`.
    async fn remove(&self, namespace: &str) -> Result<(), StorageError>;
}

/// In-memory backend for tests/dev.
///
/// Counts successful writes and can be switched into a failing mode to
/// exercise the degraded paths of the stores.
#[derive(Debug, Default)]
pub struct MemoryKv {
    tables: Mutex<HashMap<String, Value>>,
    writes: AtomicUsize,
    failing: AtomicBool,
    fail_next_load: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of successful `save`/`remove` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with [`StorageError::Backend`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Raw table contents, bypassing failure injection.
    pub fn snapshot(&self, namespace: &str) -> Option<Value> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }

    /// Seed a raw table, bypassing failure injection and write counting.
    pub fn insert_raw(&self, namespace: &str, data: Value) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string(), data);
    }

    /// Make only the next `load` fail.
    pub fn fail_next_load(&self) {
        self.fail_next_load.store(true, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::backend("memory backend unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn load(&self, namespace: &str) -> Result<Option<Value>, StorageError> {
        self.check_available()?;
        if self.fail_next_load.swap(false, Ordering::SeqCst) {
            return Err(StorageError::backend("memory backend load failed"));
        }
        Ok(self.snapshot(namespace))
    }

    async fn save(&self, namespace: &str, data: Value) -> Result<(), StorageError> {
        self.check_available()?;
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, namespace: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_load_round_trips_and_counts_writes() {
        let kv = MemoryKv::new();
        assert_eq!(kv.load("t").await.unwrap(), None);

        kv.save("t", json!({"a": 1})).await.unwrap();
        assert_eq!(kv.load("t").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(kv.write_count(), 1);

        kv.remove("t").await.unwrap();
        assert_eq!(kv.load("t").await.unwrap(), None);
        assert_eq!(kv.write_count(), 2);
    }

    #[tokio::test]
    async fn failing_mode_rejects_all_calls() {
        let kv = MemoryKv::new();
        kv.set_failing(true);
        assert!(kv.load("t").await.is_err());
        assert!(kv.save("t", json!({})).await.is_err());
        assert_eq!(kv.write_count(), 0);
    }
}
