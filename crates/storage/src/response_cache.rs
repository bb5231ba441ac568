//! Cache of raw model responses keyed by `(format, job)`.

use std::sync::Arc;

use jobscout_core::{Clock, JobId};
use serde::{Deserialize, Serialize};

use crate::backend::KvBackend;
use crate::bounded::{BoundedStore, CacheEntry, EntryLayout};
use crate::config::StoreConfig;

/// Persisted as `{ response, timestamp }`.
#[derive(Debug)]
pub struct ResponseLayout;

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub response: String,
    pub timestamp: i64,
}

impl EntryLayout for ResponseLayout {
    type Value = String;
    type Stored = ResponseRecord;

    fn encode(entry: &CacheEntry<String>) -> ResponseRecord {
        ResponseRecord {
            response: entry.value.clone(),
            timestamp: entry.timestamp,
        }
    }

    fn decode(stored: ResponseRecord) -> CacheEntry<String> {
        CacheEntry {
            value: stored.response,
            timestamp: stored.timestamp,
        }
    }
}

/// Bounded cache of raw model output.
///
/// Stores the response text exactly as the model produced it; callers parse
/// it again on every hit.
#[derive(Debug)]
pub struct ResponseCache {
    store: BoundedStore<ResponseLayout>,
}

impl ResponseCache {
    pub const NAMESPACE: &'static str = "responseCache";

    pub fn new(backend: Arc<dyn KvBackend>, clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        Self {
            store: BoundedStore::new(Self::NAMESPACE, config, backend, clock),
        }
    }

    /// `format:jobId`.
    pub fn key(format: &str, job_id: &JobId) -> String {
        format!("{format}:{job_id}")
    }

    pub async fn get(&self, format: &str, job_id: &JobId) -> Option<String> {
        self.store.get(&Self::key(format, job_id)).await
    }

    pub async fn put(&self, format: &str, job_id: &JobId, response: impl Into<String>) {
        self.store.set(&Self::key(format, job_id), response.into()).await;
    }

    pub async fn invalidate(&self, format: &str, job_id: &JobId) -> bool {
        self.store.delete(&Self::key(format, job_id)).await
    }

    pub async fn prune(&self) -> usize {
        self.store.prune().await
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }

    pub async fn clear(&self) {
        self.store.clear().await;
    }

    pub fn store(&self) -> &BoundedStore<ResponseLayout> {
        &self.store
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

    #[tokio::test]
    async fn persists_response_records_under_format_and_job() {
        let kv = MemoryKv::arc();
        let clock = ManualClock::arc(42);
        let cache = ResponseCache::new(kv.clone(), clock, StoreConfig::response_cache());

        cache.put("json", &job("123"), "{\"mustHaves\":[]}").await;

        assert_eq!(
            kv.snapshot(ResponseCache::NAMESPACE),
            Some(json!({"json:123": {"response": "{\"mustHaves\":[]}", "timestamp": 42}}))
        );
        assert_eq!(cache.get("json", &job("123")).await.as_deref(), Some("{\"mustHaves\":[]}"));
        assert_eq!(cache.get("text", &job("123")).await, None);
    }

    #[tokio::test]
    async fn entries_expire_after_a_day() {
        let kv = MemoryKv::arc();
        let clock = ManualClock::arc(0);
        let cache = ResponseCache::new(kv, clock.clone(), StoreConfig::response_cache());

        cache.put("json", &job("1"), "x").await;
        clock.advance(24 * 60 * 60 * 1000 + 1);
        assert_eq!(cache.get("json", &job("1")).await, None);
        assert_eq!(cache.len().await, 0);
    }
}
