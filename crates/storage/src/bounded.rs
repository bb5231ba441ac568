//! Generic persisted map with max-item eviction and per-entry TTL.
//!
//! ## Semantics
//!
//! - Reading a live entry refreshes its timestamp (read = "used"), so the
//!   store behaves as LRU rather than insertion-order FIFO.
//! - Inserting a new key at capacity evicts the single entry with the globally
//!   smallest timestamp, found by a full scan. Ties go to the smallest key
//!   (the table is a `BTreeMap`, scanned in key order).
//! - Expired entries are removed lazily on `get` and in bulk by `prune`.
//!
//! ## Concurrency
//!
//! Every operation is a load-modify-persist cycle over the whole table. The
//! runtime may run operations in parallel, so each store instance serializes
//! its own cycles behind an async mutex. Two store instances pointing at the
//! same namespace are *not* coordinated.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use jobscout_core::Clock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::backend::KvBackend;
use crate::config::StoreConfig;
use crate::error::StorageError;

/// Normalized in-memory entry: value plus last access-or-write time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Maps a store's persisted record shape to and from [`CacheEntry`].
///
/// Stores disagree on how a record looks on disk (an object with a timestamp
/// field, or a bare timestamp); the difference is resolved here, once, and
/// never branched on at read time.
pub trait EntryLayout: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;
    type Stored: Serialize + DeserializeOwned;

    fn encode(entry: &CacheEntry<Self::Value>) -> Self::Stored;

    fn decode(stored: Self::Stored) -> CacheEntry<Self::Value>;
}

type Table<V> = BTreeMap<String, CacheEntry<V>>;

/// Size- and age-bounded persisted map.
#[derive(Debug)]
pub struct BoundedStore<L: EntryLayout> {
    namespace: String,
    config: StoreConfig,
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    /// Serializes load-modify-persist cycles on this instance.
    guard: Mutex<()>,
    _layout: PhantomData<fn() -> L>,
}

impl<L: EntryLayout> BoundedStore<L> {
    pub fn new(
        namespace: impl Into<String>,
        config: StoreConfig,
        backend: Arc<dyn KvBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            config,
            backend,
            clock,
            guard: Mutex::new(()),
            _layout: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Return a live value and refresh its timestamp.
    ///
    /// An expired entry is deleted and reported as absent.
    pub async fn get(&self, key: &str) -> Option<L::Value> {
        let _guard = self.guard.lock().await;
        let mut table = self.load_for_write("get").await?;
        let now = self.clock.now_ms();

        let expired = match table.get(key) {
            None => {
                tracing::debug!(store = %self.namespace, key, "miss");
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            table.remove(key);
            self.save_table(&table).await;
            tracing::debug!(store = %self.namespace, key, "expired entry removed on read");
            return None;
        }

        let value = match table.get_mut(key) {
            Some(entry) => {
                entry.timestamp = now;
                entry.value.clone()
            }
            None => return None,
        };
        self.save_table(&table).await;
        tracing::debug!(store = %self.namespace, key, "hit");
        Some(value)
    }

    /// Insert or overwrite `key`, making it the most recently used entry.
    ///
    /// A new key at capacity first evicts the globally oldest entry.
    ///
    /// If the table cannot be loaded the write is skipped, so a transient
    /// backend failure never replaces the persisted table.
    pub async fn set(&self, key: &str, value: L::Value) {
        let _guard = self.guard.lock().await;
        let Some(mut table) = self.load_for_write("set").await else {
            return;
        };
        let now = self.clock.now_ms();

        if !table.contains_key(key) {
            while table.len() >= self.config.max_items {
                match evict_oldest(&mut table) {
                    Some(evicted) => {
                        tracing::debug!(store = %self.namespace, key = %evicted, "evicted oldest entry");
                    }
                    None => break,
                }
            }
        }

        table.insert(
            key.to_string(),
            CacheEntry {
                value,
                timestamp: now,
            },
        );
        self.save_table(&table).await;
    }

    /// Raw membership (does not refresh or expire).
    pub async fn has(&self, key: &str) -> bool {
        let _guard = self.guard.lock().await;
        self.load_table().await.contains_key(key)
    }

    /// Entry without refreshing it (does not expire either).
    pub async fn peek(&self, key: &str) -> Option<CacheEntry<L::Value>> {
        let _guard = self.guard.lock().await;
        self.load_table().await.remove(key)
    }

    /// Remove `key`; persists only when it was present.
    pub async fn delete(&self, key: &str) -> bool {
        let _guard = self.guard.lock().await;
        let Some(mut table) = self.load_for_write("delete").await else {
            return false;
        };
        let removed = table.remove(key).is_some();
        if removed {
            self.save_table(&table).await;
        }
        removed
    }

    /// Remove every entry older than the TTL.
    ///
    /// Persists only when at least one entry was removed; returns the count.
    pub async fn prune(&self) -> usize {
        let _guard = self.guard.lock().await;
        let Some(mut table) = self.load_for_write("prune").await else {
            return 0;
        };
        let now = self.clock.now_ms();

        let before = table.len();
        table.retain(|_, entry| !self.is_expired(entry, now));
        let removed = before - table.len();

        if removed > 0 {
            self.save_table(&table).await;
            tracing::info!(store = %self.namespace, removed, "pruned expired entries");
        } else {
            tracing::debug!(store = %self.namespace, "prune found nothing to remove");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        let _guard = self.guard.lock().await;
        self.load_table().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All stored keys, expired or not, in key order.
    pub async fn keys(&self) -> Vec<String> {
        let _guard = self.guard.lock().await;
        self.load_table().await.into_keys().collect()
    }

    /// Keys of entries that are not yet expired. Read-only: nothing is deleted.
    pub async fn live_keys(&self) -> Vec<String> {
        let _guard = self.guard.lock().await;
        let now = self.clock.now_ms();
        self.load_table()
            .await
            .into_iter()
            .filter(|(_, entry)| !self.is_expired(entry, now))
            .map(|(key, _)| key)
            .collect()
    }

    /// Drop the whole table.
    pub async fn clear(&self) {
        let _guard = self.guard.lock().await;
        if let Err(err) = self.backend.remove(&self.namespace).await {
            tracing::error!(store = %self.namespace, error = %err, "failed to clear store");
        }
    }

    fn is_expired(&self, entry: &CacheEntry<L::Value>, now: i64) -> bool {
        now.saturating_sub(entry.timestamp) > self.config.ttl_ms_i64()
    }

    /// Load for reading; a backend failure degrades to an empty table.
    async fn load_table(&self) -> Table<L::Value> {
        match self.try_load_table().await {
            Ok(table) => table,
            Err(err) => {
                tracing::error!(store = %self.namespace, error = %err, "failed to load store; using empty table");
                Table::new()
            }
        }
    }

    /// Load for a read-modify-persist cycle; `None` when the backend failed.
    async fn load_for_write(&self, op: &'static str) -> Option<Table<L::Value>> {
        match self.try_load_table().await {
            Ok(table) => Some(table),
            Err(err) => {
                tracing::error!(store = %self.namespace, op, error = %err, "failed to load store; skipping write");
                None
            }
        }
    }

    /// Load and decode the table. Undecodable content is dropped, not an error.
    async fn try_load_table(&self) -> Result<Table<L::Value>, StorageError> {
        let raw = match self.backend.load(&self.namespace).await? {
            Some(raw) => raw,
            None => return Ok(Table::new()),
        };

        let records = match raw {
            Value::Object(records) => records,
            other => {
                tracing::warn!(store = %self.namespace, kind = ?value_kind(&other), "stored table is not an object; ignoring it");
                return Ok(Table::new());
            }
        };

        let mut table = Table::new();
        for (key, record) in records {
            match serde_json::from_value::<L::Stored>(record) {
                Ok(stored) => {
                    table.insert(key, L::decode(stored));
                }
                Err(err) => {
                    tracing::warn!(store = %self.namespace, key = %key, error = %err, "dropping malformed record");
                }
            }
        }
        Ok(table)
    }

    /// Encode and persist the table; failures are logged and swallowed.
    async fn save_table(&self, table: &Table<L::Value>) {
        let mut records = Map::with_capacity(table.len());
        for (key, entry) in table {
            match serde_json::to_value(L::encode(entry)) {
                Ok(record) => {
                    records.insert(key.clone(), record);
                }
                Err(err) => {
                    tracing::error!(store = %self.namespace, key = %key, error = %err, "failed to encode record");
                }
            }
        }

        if let Err(err) = self.backend.save(&self.namespace, Value::Object(records)).await {
            tracing::error!(store = %self.namespace, error = %err, "failed to persist store");
        }
    }
}

/// Remove the entry with the strictly smallest timestamp (first in key order on ties).
fn evict_oldest<V>(table: &mut Table<V>) -> Option<String> {
    let mut oldest: Option<(&String, i64)> = None;
    for (key, entry) in table.iter() {
        match oldest {
            Some((_, ts)) if entry.timestamp >= ts => {}
            _ => oldest = Some((key, entry.timestamp)),
        }
    }

    let key = oldest.map(|(key, _)| key.clone())?;
    table.remove(&key);
    Some(key)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
