//! Set of job ids the user dismissed, with recency.

use std::collections::HashSet;
use std::sync::Arc;

use jobscout_core::{Clock, JobId};
use serde::{Deserialize, Serialize};

use crate::backend::KvBackend;
use crate::bounded::{BoundedStore, CacheEntry, EntryLayout};
use crate::config::StoreConfig;

/// Persisted as a bare timestamp per job id.
#[derive(Debug)]
pub struct DismissedLayout;

/// One persisted dismissal. Older releases wrote `{ "timestamp": n }`;
/// those are still read and are rewritten bare on the next write.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DismissedRecord {
    At(i64),
    Legacy { timestamp: i64 },
}

impl EntryLayout for DismissedLayout {
    type Value = ();
    type Stored = DismissedRecord;

    fn encode(entry: &CacheEntry<()>) -> DismissedRecord {
        DismissedRecord::At(entry.timestamp)
    }

    fn decode(stored: DismissedRecord) -> CacheEntry<()> {
        let timestamp = match stored {
            DismissedRecord::At(timestamp) | DismissedRecord::Legacy { timestamp } => timestamp,
        };
        CacheEntry { value: (), timestamp }
    }
}

/// Dismissed jobs, bounded by count and a long TTL.
#[derive(Debug)]
pub struct DismissedSet {
    store: BoundedStore<DismissedLayout>,
}

impl DismissedSet {
    pub const NAMESPACE: &'static str = "dismissedJobs";

    pub fn new(backend: Arc<dyn KvBackend>, clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        Self {
            store: BoundedStore::new(Self::NAMESPACE, config, backend, clock),
        }
    }

    /// Record a dismissal (refreshes recency if already dismissed).
    pub async fn add(&self, job_id: &JobId) {
        self.store.set(job_id.as_str(), ()).await;
        tracing::debug!(job_id = %job_id, "job dismissed");
    }

    /// Undo a dismissal. Returns whether it was present.
    pub async fn remove(&self, job_id: &JobId) -> bool {
        let removed = self.store.delete(job_id.as_str()).await;
        tracing::debug!(job_id = %job_id, removed, "job dismissal undone");
        removed
    }

    pub async fn contains(&self, job_id: &JobId) -> bool {
        self.store.has(job_id.as_str()).await
    }

    /// Snapshot of dismissed ids whose TTL has not elapsed.
    ///
    /// Expired entries are filtered out but left for `prune` to delete.
    pub async fn get_all(&self) -> HashSet<JobId> {
        self.store
            .live_keys()
            .await
            .into_iter()
            .filter_map(|key| JobId::new(key).ok())
            .collect()
    }

    pub async fn prune(&self) -> usize {
        self.store.prune().await
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKv;
    use jobscout_core::ManualClock;
    use serde_json::json;

    fn job(id: &str) -> JobId {
        JobId::new(id).unwrap()
    }

    fn set(max_items: usize, ttl_ms: u64) -> (DismissedSet, Arc<MemoryKv>, Arc<ManualClock>) {
        let kv = MemoryKv::arc();
        let clock = ManualClock::arc(1_000);
        let set = DismissedSet::new(kv.clone(), clock.clone(), StoreConfig { max_items, ttl_ms });
        (set, kv, clock)
    }

    #[tokio::test]
    async fn persists_bare_timestamps() {
        let (set, kv, _clock) = set(10, 100);
        set.add(&job("a")).await;
        assert_eq!(kv.snapshot(DismissedSet::NAMESPACE), Some(json!({"a": 1000})));
        assert!(set.contains(&job("a")).await);
    }

    #[tokio::test]
    async fn add_and_remove_round_trip() {
        let (set, _kv, _clock) = set(10, 100);
        set.add(&job("a")).await;
        set.add(&job("b")).await;
        assert!(set.remove(&job("a")).await);
        assert!(!set.remove(&job("a")).await);
        assert_eq!(set.get_all().await, HashSet::from([job("b")]));
    }

    #[tokio::test]
    async fn full_set_forgets_oldest_dismissal() {
        let (set, _kv, clock) = set(2, 10_000);
        set.add(&job("first")).await;
        clock.advance(1);
        set.add(&job("second")).await;
        clock.advance(1);
        set.add(&job("third")).await;

        assert!(!set.contains(&job("first")).await);
        assert_eq!(set.len().await, 2);
    }

    #[tokio::test]
    async fn get_all_hides_expired_until_pruned() {
        let (set, _kv, clock) = set(10, 100);
        set.add(&job("old")).await;
        clock.advance(150);
        set.add(&job("new")).await;

        assert_eq!(set.get_all().await, HashSet::from([job("new")]));
        assert_eq!(set.len().await, 2);
        assert_eq!(set.prune().await, 1);
        assert_eq!(set.len().await, 1);
    }

    #[tokio::test]
    async fn legacy_object_records_keep_their_timestamp() {
        let (set, kv, _clock) = set(10, 100);
        kv.insert_raw(
            DismissedSet::NAMESPACE,
            json!({"a": 1000, "b": {"timestamp": 950}, "c": "yesterday"}),
        );
        assert_eq!(set.get_all().await, HashSet::from([job("a"), job("b")]));

        set.add(&job("d")).await;
        assert_eq!(
            kv.snapshot(DismissedSet::NAMESPACE),
            Some(json!({"a": 1000, "b": 950, "d": 1000}))
        );
    }
}
