//! Background worker for periodic TTL pruning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::dismissed::DismissedSet;
use crate::response_cache::ResponseCache;

/// A store whose expired entries can be swept.
#[async_trait]
pub trait Prunable: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Remove expired entries, returning how many were removed.
    async fn prune(&self) -> usize;
}

#[async_trait]
impl Prunable for ResponseCache {
    fn name(&self) -> &str {
        Self::NAMESPACE
    }

    async fn prune(&self) -> usize {
        ResponseCache::prune(self).await
    }
}

#[async_trait]
impl Prunable for DismissedSet {
    fn name(&self) -> &str {
        Self::NAMESPACE
    }

    async fn prune(&self) -> usize {
        DismissedSet::prune(self).await
    }
}

/// Periodically prunes every registered store.
pub struct PruneWorker {
    stores: Vec<Arc<dyn Prunable>>,
    period: Duration,
    shutdown: Arc<Notify>,
}

/// Handle to a running [`PruneWorker`].
pub struct PruneWorkerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PruneWorker {
    pub fn new(period: Duration) -> Self {
        Self {
            stores: Vec::new(),
            period,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Add a store to the sweep.
    pub fn with_store(mut self, store: Arc<dyn Prunable>) -> Self {
        self.stores.push(store);
        self
    }

    /// Prune all stores once, returning the total number of removed entries.
    pub async fn prune_now(&self) -> usize {
        prune_all(&self.stores).await
    }

    /// Spawn the worker.
    ///
    /// The first sweep runs immediately; later sweeps follow every `period`.
    /// Missed ticks are skipped rather than replayed.
    pub fn start(self) -> PruneWorkerHandle {
        let shutdown = self.shutdown.clone();
        let stores = self.stores;
        let period = self.period;

        let task = tokio::spawn(async move {
            tracing::info!(period_ms = period.as_millis() as u64, "prune worker started");

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("prune worker received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        prune_all(&stores).await;
                    }
                }
            }

            tracing::info!("prune worker stopped");
        });

        PruneWorkerHandle {
            shutdown: self.shutdown,
            task,
        }
    }
}

impl PruneWorkerHandle {
    /// Request graceful shutdown and wait for the task to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "prune worker task ended abnormally");
        }
    }
}

async fn prune_all(stores: &[Arc<dyn Prunable>]) -> usize {
    let mut total = 0;
    for store in stores {
        let removed = store.prune().await;
        if removed > 0 {
            tracing::info!(store = store.name(), removed, "pruned expired entries");
        }
        total += removed;
    }
    total
}
