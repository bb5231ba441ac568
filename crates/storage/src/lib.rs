//! `jobscout-storage`
//!
//! **Responsibility:** persisted, size- and age-bounded key-value tables.
//!
//! This crate provides:
//! - A namespaced key-value backend abstraction (in-memory and SQLite)
//! - `BoundedStore`: max-item eviction of the globally oldest entry plus TTL pruning
//! - Two specializations: the model `ResponseCache` and the `DismissedSet`
//! - A background `PruneWorker`
//!
//! Storage failures never escape a store operation: they are logged and the
//! operation degrades to an empty table or a skipped write.

pub mod backend;
pub mod bounded;
pub mod config;
pub mod dismissed;
pub mod error;
pub mod pruner;
pub mod response_cache;
pub mod sqlite;

pub use backend::{KvBackend, MemoryKv};
pub use bounded::{BoundedStore, CacheEntry, EntryLayout};
pub use config::{ConfigError, StoreConfig};
pub use dismissed::DismissedSet;
pub use error::StorageError;
pub use pruner::{Prunable, PruneWorker, PruneWorkerHandle};
pub use response_cache::ResponseCache;
pub use sqlite::SqliteKv;
