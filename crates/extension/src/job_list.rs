//! Classification of the externally rendered job list.
//!
//! The page owns the list; we only see it through [`JobListHost`]. Cards are
//! classified once when the observer starts and then only as they are added,
//! so work is proportional to new nodes rather than list length.

use std::collections::HashSet;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jobscout_core::JobId;
use jobscout_storage::DismissedSet;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

/// Host-assigned handle of a node in the list.
pub type NodeId = u64;

/// How a class of cards is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Highlight,
    Hide,
}

impl std::str::FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "highlight" => Ok(DisplayMode::Highlight),
            "hide" => Ok(DisplayMode::Hide),
            other => Err(format!("unknown display mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisplayPreferences {
    pub viewed_jobs: DisplayMode,
    pub applied_jobs: DisplayMode,
    pub dismissed_jobs: DisplayMode,
}

impl DisplayPreferences {
    fn mode_for(&self, class: CardClass) -> Option<DisplayMode> {
        match class {
            CardClass::Dismissed => Some(self.dismissed_jobs),
            CardClass::Applied => Some(self.applied_jobs),
            CardClass::Viewed => Some(self.viewed_jobs),
            CardClass::Neutral => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardClass {
    Dismissed,
    Applied,
    Viewed,
    Neutral,
}

/// Visual treatment applied to a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardStyle {
    Highlight(CardClass),
    Hidden,
    /// All of our styling removed.
    Plain,
}

/// Snapshot of one job card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCard {
    pub node: NodeId,
    pub job_id: Option<JobId>,
    /// Visible text of the card.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardAction {
    Dismiss,
    Undo,
}

/// Structural and user events from the list container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent {
    Added(Vec<NodeId>),
    Click { target: NodeId },
}

/// Access to the live list.
pub trait JobListHost: Send + Sync {
    /// Every card currently in the list.
    fn cards(&self) -> Vec<JobCard>;

    /// The card `node` is, or the nearest card containing it.
    fn card_for(&self, node: NodeId) -> Option<JobCard>;

    /// The dismiss or undo button `node` is, or sits inside.
    fn action_for(&self, node: NodeId) -> Option<CardAction>;

    fn apply_style(&self, node: NodeId, style: CardStyle);
}

/// Dismissed beats applied, applied beats viewed.
pub fn classify(card: &JobCard, dismissed: &HashSet<JobId>) -> CardClass {
    if card.job_id.as_ref().is_some_and(|id| dismissed.contains(id)) {
        return CardClass::Dismissed;
    }
    let text = card.text.to_lowercase();
    if text.contains("applied") {
        CardClass::Applied
    } else if text.contains("viewed") {
        CardClass::Viewed
    } else {
        CardClass::Neutral
    }
}

/// Keeps card styling in line with the dismissed set and user gestures.
pub struct JobListObserver<H: JobListHost> {
    host: Arc<H>,
    store: Arc<DismissedSet>,
    prefs: DisplayPreferences,
    /// In-memory copy of the dismissed set; authoritative for styling.
    mirror: Mutex<HashSet<JobId>>,
    pending: Mutex<Pending>,
}

/// Persistence tasks, applied in the order the gestures happened.
#[derive(Default)]
struct Pending {
    tasks: JoinSet<()>,
    /// Completion signal of the most recently spawned task.
    tail: Option<oneshot::Receiver<()>>,
}

impl Pending {
    fn push<F>(&mut self, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "dismissed job persistence task failed");
            }
        }

        let (done, tail) = oneshot::channel();
        let previous = self.tail.replace(tail);
        self.tasks.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            write.await;
            let _ = done.send(());
        });
    }
}

impl<H: JobListHost> Drop for JobListObserver<H> {
    /// Writes still queued run to completion instead of being aborted.
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        pending.tasks.detach_all();
    }
}

impl<H: JobListHost> JobListObserver<H> {
    pub fn new(host: Arc<H>, store: Arc<DismissedSet>, prefs: DisplayPreferences) -> Self {
        Self {
            host,
            store,
            prefs,
            mirror: Mutex::new(HashSet::new()),
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Load the dismissed set and style every card present.
    pub async fn start(&self) {
        let dismissed = self.store.get_all().await;
        tracing::debug!(dismissed = dismissed.len(), "job list observer started");
        *self.lock_mirror() = dismissed;

        for card in self.host.cards() {
            self.style_card(&card);
        }
    }

    pub fn handle(&self, event: ListEvent) {
        match event {
            ListEvent::Added(nodes) => {
                for node in nodes {
                    if let Some(card) = self.host.card_for(node) {
                        self.style_card(&card);
                    }
                }
            }
            ListEvent::Click { target } => self.handle_click(target),
        }
    }

    pub fn is_dismissed(&self, job_id: &JobId) -> bool {
        self.lock_mirror().contains(job_id)
    }

    /// Wait until every dismiss/undo issued so far has been persisted.
    pub async fn flush(&self) {
        let mut pending = mem::take(&mut self.lock_pending().tasks);
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "dismissed job persistence task failed");
            }
        }
    }

    fn lock_mirror(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn pending_writes(&self) -> usize {
        self.lock_pending().tasks.len()
    }

    fn style_card(&self, card: &JobCard) {
        if card.job_id.is_none() {
            return;
        }
        let class = classify(card, &self.lock_mirror());
        let style = match self.prefs.mode_for(class) {
            None => return,
            Some(DisplayMode::Highlight) => CardStyle::Highlight(class),
            Some(DisplayMode::Hide) => CardStyle::Hidden,
        };
        self.host.apply_style(card.node, style);
    }

    fn handle_click(&self, target: NodeId) {
        let Some(card) = self.host.card_for(target) else {
            return;
        };
        let Some(job_id) = card.job_id.clone() else {
            return;
        };
        match self.host.action_for(target) {
            Some(CardAction::Dismiss) => self.dismiss(&card, job_id),
            Some(CardAction::Undo) => self.undo(&card, job_id),
            None => {}
        }
    }

    fn dismiss(&self, card: &JobCard, job_id: JobId) {
        self.lock_mirror().insert(job_id.clone());
        self.style_card(card);

        let store = self.store.clone();
        self.lock_pending().push(async move {
            store.add(&job_id).await;
        });
    }

    fn undo(&self, card: &JobCard, job_id: JobId) {
        self.lock_mirror().remove(&job_id);
        self.host.apply_style(card.node, CardStyle::Plain);

        let store = self.store.clone();
        self.lock_pending().push(async move {
            store.remove(&job_id).await;
        });
    }
}
