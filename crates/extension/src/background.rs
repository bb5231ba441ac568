//! The background service: navigation tracking, extraction, session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;
use jobscout_ai::{ExtractionCoordinator, LlmClient, RetryPolicy};
use jobscout_core::{BackgroundResponse, Clock, JobId, JobSummary, TabId};
use jobscout_storage::{DismissedSet, KvBackend, PruneWorker, ResponseCache};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::config::ExtensionConfig;
use crate::navigation::{NavigationEvent, NavigationTracker};
use crate::panel::SummaryService;
use crate::subscription::SubscriptionApi;

pub const NO_ACTIVE_JOB: &str = "No active Job ID found for this tab.";

/// Messages accepted from the content side, the popup and the marketing site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum BackgroundRequest {
    ExtractJobSummary {
        text: String,
        #[serde(default)]
        job_id: Option<String>,
    },
    #[serde(alias = "SET_CLERK_TOKEN")]
    SetSession {
        token: String,
        #[serde(default)]
        user: Value,
    },
    GetAuthStatus,
    Logout,
}

/// Commands pushed to a tab's content side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ContentCommand {
    UrlUpdated { job_id: Option<JobId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabCommand {
    pub tab_id: TabId,
    pub command: ContentCommand,
}

/// Login and entitlement as shown by the popup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatus {
    #[serde(rename = "isLoggedIn")]
    pub logged_in: bool,
    #[serde(rename = "subscribed")]
    pub entitled: bool,
    #[serde(rename = "subscriptionEndDate")]
    pub subscription_end: Option<NaiveDate>,
}

impl AuthStatus {
    pub fn logged_out() -> Self {
        Self::default()
    }
}

/// Broadcast to every extension page (popup, options).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeEvent {
    #[serde(rename = "ON_LOGIN_SUCCESS")]
    LoginSucceeded(AuthStatus),
    #[serde(rename = "LOGOUT_SUCCESS")]
    LoggedOut,
}

/// Reply to a [`BackgroundRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BackgroundReply {
    Summary(BackgroundResponse<JobSummary>),
    Auth(AuthStatus),
    Ack(BackgroundResponse<()>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    token: String,
    #[serde(default)]
    user: Value,
}

pub struct Background {
    config: ExtensionConfig,
    tracker: Mutex<NavigationTracker>,
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    /// One single-flight coordinator per sending tab; tabs never supersede each other.
    coordinators: Mutex<HashMap<Option<TabId>, Arc<ExtractionCoordinator>>>,
    response_cache: Arc<ResponseCache>,
    dismissed: Arc<DismissedSet>,
    kv: Arc<dyn KvBackend>,
    subscriptions: Arc<dyn SubscriptionApi>,
    commands: mpsc::UnboundedSender<TabCommand>,
    events: broadcast::Sender<RuntimeEvent>,
}

impl Background {
    pub const SESSION_NAMESPACE: &'static str = "session";

    /// Build the service; the receiver yields commands addressed to tabs.
    pub fn new(
        config: ExtensionConfig,
        kv: Arc<dyn KvBackend>,
        clock: Arc<dyn Clock>,
        llm: Arc<dyn LlmClient>,
        subscriptions: Arc<dyn SubscriptionApi>,
    ) -> (Self, mpsc::UnboundedReceiver<TabCommand>) {
        let response_cache = Arc::new(ResponseCache::new(kv.clone(), clock.clone(), config.response_cache));
        let dismissed = Arc::new(DismissedSet::new(kv.clone(), clock, config.dismissed_jobs));
        let tracker = NavigationTracker::new(config.jobs_url_prefix.clone(), config.job_id_param.clone());
        let retry = config.retry;
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(16);

        let background = Self {
            config,
            tracker: Mutex::new(tracker),
            llm,
            retry,
            coordinators: Mutex::new(HashMap::new()),
            response_cache,
            dismissed,
            kv,
            subscriptions,
            commands,
            events,
        };
        (background, commands_rx)
    }

    pub fn config(&self) -> &ExtensionConfig {
        &self.config
    }

    /// The coordinator serving `tab`, created on first use.
    pub fn coordinator_for(&self, tab: Option<TabId>) -> Arc<ExtractionCoordinator> {
        self.coordinators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tab)
            .or_insert_with(|| {
                Arc::new(ExtractionCoordinator::new(
                    self.llm.clone(),
                    self.response_cache.clone(),
                    self.retry,
                ))
            })
            .clone()
    }

    pub fn response_cache(&self) -> &Arc<ResponseCache> {
        &self.response_cache
    }

    pub fn dismissed_set(&self) -> &Arc<DismissedSet> {
        &self.dismissed
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    /// Periodic pruning of both stores.
    pub fn prune_worker(&self) -> PruneWorker {
        PruneWorker::new(self.config.prune_interval())
            .with_store(self.response_cache.clone())
            .with_store(self.dismissed.clone())
    }

    fn tracker(&self) -> MutexGuard<'_, NavigationTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a navigation and tell the tab when its job changed.
    pub fn on_history_state_updated(&self, event: &NavigationEvent) -> bool {
        let Some(change) = self.tracker().on_history_state_updated(event) else {
            return false;
        };
        let command = TabCommand {
            tab_id: change.tab_id,
            command: ContentCommand::UrlUpdated { job_id: change.job_id },
        };
        if self.commands.send(command).is_err() {
            tracing::warn!(tab_id = %change.tab_id, "no content side listening for tab commands");
        }
        true
    }

    pub fn on_tab_removed(&self, tab_id: TabId) {
        if self.tracker().on_tab_removed(tab_id) {
            tracing::debug!(tab_id = %tab_id, "tab state dropped");
        }
        let coordinator = self
            .coordinators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Some(tab_id));
        if let Some(sequence_id) = coordinator.and_then(|c| c.cancel_active()) {
            tracing::debug!(tab_id = %tab_id, sequence_id, "extraction for closed tab cancelled");
        }
    }

    pub fn current_job(&self, tab_id: TabId) -> Option<JobId> {
        self.tracker().current_job(tab_id).cloned()
    }

    /// Summarize for the sender's tab; the request's job id is the fallback.
    pub async fn extract_job_summary(
        &self,
        sender: Option<TabId>,
        text: &str,
        requested: Option<&str>,
    ) -> BackgroundResponse<JobSummary> {
        let tab_job = sender.and_then(|tab| self.current_job(tab));
        let job_id = tab_job.or_else(|| requested.and_then(|raw| JobId::new(raw).ok()));

        let Some(job_id) = job_id else {
            return BackgroundResponse::err(NO_ACTIVE_JOB);
        };
        self.coordinator_for(sender)
            .extract_job_summary(text, &job_id)
            .await
            .into_response()
    }

    /// Store the session handed over by the website and announce the login.
    pub async fn set_session(&self, token: String, user: Value) -> BackgroundResponse<()> {
        let session = Session { token, user };
        let payload = match serde_json::to_value(&session) {
            Ok(payload) => payload,
            Err(e) => return BackgroundResponse::err(e.to_string()),
        };
        if let Err(e) = self.kv.save(Self::SESSION_NAMESPACE, payload).await {
            tracing::error!(error = %e, "failed to persist session");
            return BackgroundResponse::err("Could not save session.");
        }
        tracing::info!("session stored");

        let status = self.auth_status().await;
        let _ = self.events.send(RuntimeEvent::LoginSucceeded(status));
        BackgroundResponse::ok(())
    }

    /// Login and entitlement; any failure reads as logged out.
    pub async fn auth_status(&self) -> AuthStatus {
        let Some(session) = self.load_session().await else {
            return AuthStatus::logged_out();
        };

        match self.subscriptions.status(&session.token).await {
            Ok(status) => AuthStatus {
                logged_in: true,
                entitled: status.is_entitled(),
                subscription_end: status.ends_on(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "subscription status unavailable");
                AuthStatus::logged_out()
            }
        }
    }

    pub async fn logout(&self) -> BackgroundResponse<()> {
        if let Err(e) = self.kv.remove(Self::SESSION_NAMESPACE).await {
            tracing::error!(error = %e, "failed to clear session");
        }
        tracing::info!("logged out");
        let _ = self.events.send(RuntimeEvent::LoggedOut);
        BackgroundResponse::ok(())
    }

    async fn load_session(&self) -> Option<Session> {
        let raw = match self.kv.load(Self::SESSION_NAMESPACE).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::error!(error = %e, "failed to read session");
                return None;
            }
        };
        match serde_json::from_value::<Session>(raw) {
            Ok(session) if !session.token.trim().is_empty() => Some(session),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed session");
                None
            }
        }
    }

    /// Dispatch one request from `sender`.
    pub async fn handle(&self, sender: Option<TabId>, request: BackgroundRequest) -> BackgroundReply {
        match request {
            BackgroundRequest::ExtractJobSummary { text, job_id } => {
                BackgroundReply::Summary(self.extract_job_summary(sender, &text, job_id.as_deref()).await)
            }
            BackgroundRequest::SetSession { token, user } => BackgroundReply::Ack(self.set_session(token, user).await),
            BackgroundRequest::GetAuthStatus => BackgroundReply::Auth(self.auth_status().await),
            BackgroundRequest::Logout => BackgroundReply::Ack(self.logout().await),
        }
    }
}

/// A tab's connection to the background service.
pub struct TabPort {
    background: Arc<Background>,
    tab_id: TabId,
}

impl TabPort {
    pub fn new(background: Arc<Background>, tab_id: TabId) -> Self {
        Self { background, tab_id }
    }
}

#[async_trait]
impl SummaryService for TabPort {
    async fn extract_job_summary(&self, text: &str, job_id: &JobId) -> BackgroundResponse<JobSummary> {
        self.background
            .extract_job_summary(Some(self.tab_id), text, Some(job_id.as_str()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::fake::FakePage;
    use crate::panel::{PanelState, SummaryProcessor};
    use crate::subscription::{SubscriptionError, SubscriptionStatus};
    use std::time::Duration;
    use jobscout_ai::{LlmError, ResponseFormat};
    use jobscout_core::ManualClock;
    use jobscout_storage::MemoryKv;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    const PREFIX: &str = "https://www.linkedin.com/jobs/search/";
    const SUMMARY: &str = r#"{"mustHaves":["Rust"],"preferred":[],"requirements":[]}"#;

    #[derive(Debug, Default)]
    struct EchoLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(&self, _: &str, _: ResponseFormat, _: &CancellationToken) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SUMMARY.to_string())
        }
    }

    #[derive(Debug)]
    struct FixedSubscription(Result<SubscriptionStatus, SubscriptionError>);

    #[async_trait]
    impl SubscriptionApi for FixedSubscription {
        async fn status(&self, token: &str) -> Result<SubscriptionStatus, SubscriptionError> {
            assert_eq!(token, "tok");
            self.0.clone()
        }
    }

    fn active() -> FixedSubscription {
        FixedSubscription(Ok(SubscriptionStatus {
            status: "active".into(),
            cancel_at_period_end: true,
            current_period_end: Some(1_709_251_200),
        }))
    }

    fn background(
        subscription: FixedSubscription,
    ) -> (Background, mpsc::UnboundedReceiver<TabCommand>, Arc<MemoryKv>, Arc<EchoLlm>) {
        let kv = MemoryKv::arc();
        let llm = Arc::new(EchoLlm::default());
        let (bg, rx) = Background::new(
            ExtensionConfig::default(),
            kv.clone(),
            ManualClock::arc(0),
            llm.clone(),
            Arc::new(subscription),
        );
        (bg, rx, kv, llm)
    }

    fn nav(tab: i64, query: &str) -> NavigationEvent {
        NavigationEvent {
            tab_id: TabId(tab),
            url: format!("{PREFIX}{query}"),
            frame_id: 0,
        }
    }

    #[test]
    fn request_wire_format() {
        let req: BackgroundRequest =
            serde_json::from_value(json!({"type": "EXTRACT_JOB_SUMMARY", "text": "desc", "jobId": "42"})).unwrap();
        assert_eq!(
            req,
            BackgroundRequest::ExtractJobSummary { text: "desc".into(), job_id: Some("42".into()) }
        );

        let req: BackgroundRequest =
            serde_json::from_value(json!({"type": "SET_CLERK_TOKEN", "token": "t", "user": {"id": 1}})).unwrap();
        assert!(matches!(req, BackgroundRequest::SetSession { .. }));

        let req: BackgroundRequest = serde_json::from_value(json!({"type": "GET_AUTH_STATUS"})).unwrap();
        assert_eq!(req, BackgroundRequest::GetAuthStatus);
    }

    #[test]
    fn command_and_status_wire_format() {
        let cmd = ContentCommand::UrlUpdated { job_id: Some(JobId::new("7").unwrap()) };
        assert_eq!(serde_json::to_value(&cmd).unwrap(), json!({"type": "URL_UPDATED", "jobId": "7"}));

        let status = AuthStatus {
            logged_in: true,
            entitled: false,
            subscription_end: None,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"isLoggedIn": true, "subscribed": false, "subscriptionEndDate": null})
        );
        assert_eq!(
            serde_json::to_value(RuntimeEvent::LoggedOut).unwrap(),
            json!({"type": "LOGOUT_SUCCESS"})
        );
    }

    #[tokio::test]
    async fn navigation_pushes_url_updated_to_the_tab() {
        let (bg, mut rx, _kv, _llm) = background(active());

        assert!(bg.on_history_state_updated(&nav(3, "?currentJobId=42")));
        assert!(!bg.on_history_state_updated(&nav(3, "?currentJobId=42&start=25")));

        let cmd = rx.recv().await.unwrap();
        assert_eq!(
            cmd,
            TabCommand {
                tab_id: TabId(3),
                command: ContentCommand::UrlUpdated { job_id: Some(JobId::new("42").unwrap()) },
            }
        );
        assert!(rx.try_recv().is_err());

        bg.on_tab_removed(TabId(3));
        assert_eq!(bg.current_job(TabId(3)), None);
    }

    #[tokio::test]
    async fn tab_job_wins_over_requested_job() {
        let (bg, _rx, _kv, _llm) = background(active());
        bg.on_history_state_updated(&nav(1, "?currentJobId=tab-job"));

        let response = bg.extract_job_summary(Some(TabId(1)), "desc", Some("other")).await;
        assert!(response.is_success());
        assert!(bg.response_cache().get("json", &JobId::new("tab-job").unwrap()).await.is_some());
        assert!(bg.response_cache().get("json", &JobId::new("other").unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn requested_job_is_the_fallback() {
        let (bg, _rx, _kv, llm) = background(active());
        let response = bg.extract_job_summary(Some(TabId(9)), "desc", Some("fallback")).await;
        assert!(response.is_success());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_job_anywhere_is_an_error() {
        let (bg, _rx, _kv, llm) = background(active());
        let reply = bg
            .handle(None, BackgroundRequest::ExtractJobSummary { text: "desc".into(), job_id: None })
            .await;
        assert_eq!(reply, BackgroundReply::Summary(BackgroundResponse::err(NO_ACTIVE_JOB)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    /// Answers after two seconds unless cancelled first.
    #[derive(Debug)]
    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(&self, _: &str, _: ResponseFormat, token: &CancellationToken) -> Result<String, LlmError> {
            tokio::select! {
                _ = token.cancelled() => Err(LlmError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(2)) => Ok(SUMMARY.to_string()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tabs_do_not_supersede_each_other() {
        let (bg, _rx) = Background::new(
            ExtensionConfig::default(),
            MemoryKv::arc(),
            ManualClock::arc(0),
            Arc::new(SlowLlm),
            Arc::new(active()),
        );
        let bg = Arc::new(bg);
        let panel_for = |tab: i64| {
            let page = Arc::new(FakePage::new(PREFIX));
            page.set_description(Some("desc"));
            let port = Arc::new(TabPort::new(bg.clone(), TabId(tab)));
            Arc::new(SummaryProcessor::new(page, port, Duration::from_secs(5)))
        };
        let tab_a = panel_for(1);
        let tab_b = panel_for(2);

        let run_a = tokio::spawn({
            let tab_a = tab_a.clone();
            async move { tab_a.run_extraction(Some(JobId::new("A").unwrap())).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tab_b.run_extraction(Some(JobId::new("B").unwrap())).await;
        run_a.await.unwrap();

        assert!(matches!(tab_a.panel(), PanelState::Summary { job_id, .. } if job_id.as_str() == "A"));
        assert!(matches!(tab_b.panel(), PanelState::Summary { job_id, .. } if job_id.as_str() == "B"));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_a_tab_cancels_its_extraction() {
        let (bg, _rx) = Background::new(
            ExtensionConfig::default(),
            MemoryKv::arc(),
            ManualClock::arc(0),
            Arc::new(SlowLlm),
            Arc::new(active()),
        );
        let bg = Arc::new(bg);
        let pending = tokio::spawn({
            let bg = bg.clone();
            async move { bg.extract_job_summary(Some(TabId(5)), "desc", Some("A")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        bg.on_tab_removed(TabId(5));
        assert_eq!(pending.await.unwrap(), BackgroundResponse::err("Aborted"));
    }

    #[tokio::test]
    async fn session_lifecycle_drives_auth_status() {
        let (bg, _rx, kv, _llm) = background(active());
        let mut events = bg.subscribe_events();
        assert_eq!(bg.auth_status().await, AuthStatus::logged_out());

        let ack = bg.set_session("tok".into(), json!({"email": "a@b.c"})).await;
        assert!(ack.is_success());
        assert!(kv.snapshot(Background::SESSION_NAMESPACE).is_some());

        let expected = AuthStatus {
            logged_in: true,
            entitled: true,
            subscription_end: NaiveDate::from_ymd_opt(2024, 3, 1),
        };
        assert_eq!(events.recv().await.unwrap(), RuntimeEvent::LoginSucceeded(expected.clone()));
        assert_eq!(bg.auth_status().await, expected);

        bg.logout().await;
        assert_eq!(events.recv().await.unwrap(), RuntimeEvent::LoggedOut);
        assert_eq!(bg.auth_status().await, AuthStatus::logged_out());
    }

    #[tokio::test]
    async fn backend_failure_reads_as_logged_out() {
        let (bg, _rx, _kv, _llm) = background(FixedSubscription(Err(SubscriptionError::Network("down".into()))));
        bg.set_session("tok".into(), Value::Null).await;
        assert_eq!(bg.auth_status().await, AuthStatus::logged_out());
    }

    #[tokio::test]
    async fn storage_failure_reads_as_logged_out() {
        let (bg, _rx, kv, _llm) = background(active());
        bg.set_session("tok".into(), Value::Null).await;
        kv.set_failing(true);
        assert_eq!(bg.auth_status().await, AuthStatus::logged_out());
    }
}
