//! Per-tab tracking of the job currently open on the monitored page.

use std::collections::HashMap;

use jobscout_core::{JobId, TabId};
use serde::{Deserialize, Serialize};
use url::Url;

/// A history-state update reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEvent {
    pub tab_id: TabId,
    pub url: String,
    /// `0` is the top-level frame.
    #[serde(default)]
    pub frame_id: i64,
}

/// Emitted when a tab's open job changes (`None`: no job open).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobChanged {
    pub tab_id: TabId,
    pub job_id: Option<JobId>,
}

#[derive(Debug, Default)]
struct TabState {
    current_job: Option<JobId>,
}

/// Maps each tab to the job it shows.
///
/// Entries live from a tab's first tracked navigation until the tab closes.
#[derive(Debug)]
pub struct NavigationTracker {
    url_prefix: String,
    job_param: String,
    tabs: HashMap<TabId, TabState>,
}

impl NavigationTracker {
    pub fn new(url_prefix: impl Into<String>, job_param: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            job_param: job_param.into(),
            tabs: HashMap::new(),
        }
    }

    /// Apply a navigation; returns the change signal, if any.
    ///
    /// Sub-frame navigations and URLs outside the prefix are ignored. A tab
    /// never seen before counts as having no job open.
    pub fn on_history_state_updated(&mut self, event: &NavigationEvent) -> Option<JobChanged> {
        if event.frame_id != 0 || !event.url.starts_with(&self.url_prefix) {
            return None;
        }

        let url = match Url::parse(&event.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(tab_id = %event.tab_id, error = %e, "unparsable navigation URL");
                return None;
            }
        };
        let job_id = job_id_from_url(&url, &self.job_param);

        let state = self.tabs.entry(event.tab_id).or_default();
        if state.current_job == job_id {
            return None;
        }

        tracing::info!(
            tab_id = %event.tab_id,
            from = ?state.current_job.as_ref().map(JobId::as_str),
            to = ?job_id.as_ref().map(JobId::as_str),
            "job changed"
        );
        state.current_job = job_id.clone();
        Some(JobChanged {
            tab_id: event.tab_id,
            job_id,
        })
    }

    /// Forget a closed tab. Returns whether it was tracked.
    pub fn on_tab_removed(&mut self, tab_id: TabId) -> bool {
        self.tabs.remove(&tab_id).is_some()
    }

    pub fn current_job(&self, tab_id: TabId) -> Option<&JobId> {
        self.tabs.get(&tab_id).and_then(|s| s.current_job.as_ref())
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }
}

/// Job id carried by `param`; blank values count as absent.
pub fn job_id_from_url(url: &Url, param: &str) -> Option<JobId> {
    url.query_pairs()
        .find(|(key, _)| key == param)
        .and_then(|(_, value)| JobId::new(value.into_owned()).ok())
}

/// [`job_id_from_url`] for an unparsed URL.
pub fn job_id_from_str(url: &str, param: &str) -> Option<JobId> {
    Url::parse(url).ok().and_then(|url| job_id_from_url(&url, param))
}
