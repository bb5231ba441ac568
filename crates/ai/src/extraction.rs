//! Single-flight job summary extraction.
//!
//! Every call to [`ExtractionCoordinator::extract_job_summary`] becomes the
//! active request: the previous request's token is cancelled and whatever it
//! eventually produces is reported as cancelled. Only the active request may
//! move the coordinator's state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use jobscout_core::{BackgroundResponse, JobId, JobSummary, parse_summary};
use jobscout_storage::ResponseCache;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{LlmClient, ResponseFormat};
use crate::error::ExtractionError;
use crate::prompt::render_job_summary_prompt;
use crate::retry::RetryPolicy;

/// Lifecycle of the most recent extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionState {
    Idle,
    Running { sequence_id: u64 },
    Completed { sequence_id: u64 },
    Cancelled { sequence_id: u64 },
    Failed { sequence_id: u64, error: String },
}

/// Result of one extraction request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    pub sequence_id: u64,
    pub result: Result<JobSummary, ExtractionError>,
}

impl ExtractionOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_cancelled())
    }

    /// Wire form handed back to the content side.
    pub fn into_response(self) -> BackgroundResponse<JobSummary> {
        match self.result {
            Ok(summary) => BackgroundResponse::ok(summary),
            Err(err) => BackgroundResponse::err(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveRequest {
    sequence_id: u64,
    token: CancellationToken,
}

#[derive(Debug)]
pub struct ExtractionCoordinator {
    llm: Arc<dyn LlmClient>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
    format: ResponseFormat,
    next_sequence: AtomicU64,
    active: Mutex<Option<ActiveRequest>>,
    state: watch::Sender<ExtractionState>,
}

impl ExtractionCoordinator {
    pub fn new(llm: Arc<dyn LlmClient>, cache: Arc<ResponseCache>, retry: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ExtractionState::Idle);
        Self {
            llm,
            cache,
            retry,
            format: ResponseFormat::Json,
            next_sequence: AtomicU64::new(0),
            active: Mutex::new(None),
            state,
        }
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn state(&self) -> ExtractionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExtractionState> {
        self.state.subscribe()
    }

    pub fn active_sequence(&self) -> Option<u64> {
        self.lock_active().as_ref().map(|a| a.sequence_id)
    }

    /// Cancel the active request, if any. Returns its sequence id.
    pub fn cancel_active(&self) -> Option<u64> {
        let mut active = self.lock_active();
        let request = active.take()?;
        request.token.cancel();
        self.state.send_replace(ExtractionState::Cancelled {
            sequence_id: request.sequence_id,
        });
        tracing::info!(sequence_id = request.sequence_id, "extraction cancelled");
        Some(request.sequence_id)
    }

    /// Summarize `text` for `job_id`, superseding any request in flight.
    pub async fn extract_job_summary(&self, text: &str, job_id: &JobId) -> ExtractionOutcome {
        let request = self.begin();
        tracing::info!(sequence_id = request.sequence_id, job_id = %job_id, "extraction started");

        let result = self.run(text, job_id, &request.token).await;
        self.finish(request, result)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRequest>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> ActiveRequest {
        let mut active = self.lock_active();
        let sequence_id = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let request = ActiveRequest {
            sequence_id,
            token: CancellationToken::new(),
        };

        if let Some(previous) = active.replace(request.clone()) {
            previous.token.cancel();
            tracing::info!(
                sequence_id,
                superseded = previous.sequence_id,
                "superseding in-flight extraction"
            );
        }
        self.state.send_replace(ExtractionState::Running { sequence_id });
        request
    }

    fn finish(
        &self,
        request: ActiveRequest,
        result: Result<JobSummary, ExtractionError>,
    ) -> ExtractionOutcome {
        let sequence_id = request.sequence_id;
        let mut active = self.lock_active();

        let is_current = active.as_ref().is_some_and(|a| a.sequence_id == sequence_id);
        if !is_current {
            tracing::debug!(sequence_id, "discarding result of superseded extraction");
            return ExtractionOutcome {
                sequence_id,
                result: Err(ExtractionError::Cancelled),
            };
        }
        *active = None;

        let next = match &result {
            Ok(_) => {
                tracing::info!(sequence_id, "extraction completed");
                ExtractionState::Completed { sequence_id }
            }
            Err(ExtractionError::Cancelled) => ExtractionState::Cancelled { sequence_id },
            Err(err) => {
                tracing::error!(sequence_id, error = %err, "extraction failed");
                ExtractionState::Failed {
                    sequence_id,
                    error: err.to_string(),
                }
            }
        };
        self.state.send_replace(next);

        ExtractionOutcome { sequence_id, result }
    }

    async fn run(
        &self,
        text: &str,
        job_id: &JobId,
        token: &CancellationToken,
    ) -> Result<JobSummary, ExtractionError> {
        if token.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let format = self.format.as_str();
        let cached = self.cache.get(format, job_id).await;
        if token.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let (raw, from_cache) = match cached {
            Some(raw) => {
                tracing::debug!(job_id = %job_id, format, "response cache hit");
                (raw, true)
            }
            None => {
                tracing::debug!(job_id = %job_id, format, "response cache miss");
                let prompt = render_job_summary_prompt(text);
                let raw = self
                    .retry
                    .retry(|| self.llm.complete(&prompt, self.format, token), token)
                    .await?;
                (raw, false)
            }
        };

        if token.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let summary = match parse_summary(&raw) {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(job_id = %job_id, from_cache, error = %err, "model output rejected");
                if from_cache {
                    self.cache.invalidate(format, job_id).await;
                }
                return Err(err.into());
            }
        };

        if !from_cache {
            self.cache.put(format, job_id, raw).await;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use jobscout_core::ManualClock;
    use jobscout_storage::{MemoryKv, StoreConfig};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const SUMMARY: &str = r#"{"mustHaves":["Rust"],"preferred":[],"requirements":["Remote"]}"#;

    /// Replies from a script, one per call, each after a delay.
    #[derive(Debug, Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<(Duration, Result<String, LlmError>)>>,
        calls: AtomicUsize,
        /// Keep going after cancellation, like a request already on the wire.
        ignore_cancel: bool,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<(u64, Result<&str, LlmError>)>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|(ms, r)| (Duration::from_millis(ms), r.map(str::to_owned)))
                        .collect(),
                ),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(
            &self,
            _prompt: &str,
            _format: ResponseFormat,
            token: &CancellationToken,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (delay, reply) = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((Duration::ZERO, Err(LlmError::Network("no reply scripted".into()))));

            if self.ignore_cancel {
                tokio::time::sleep(delay).await;
                return reply;
            }
            tokio::select! {
                _ = token.cancelled() => Err(LlmError::Cancelled),
                _ = tokio::time::sleep(delay) => reply,
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.0,
        }
    }

    struct Fixture {
        kv: Arc<MemoryKv>,
        cache: Arc<ResponseCache>,
    }

    fn fixture() -> Fixture {
        let kv = MemoryKv::arc();
        let cache = Arc::new(ResponseCache::new(
            kv.clone(),
            ManualClock::arc(0),
            StoreConfig::response_cache(),
        ));
        Fixture { kv, cache }
    }

    fn job(id: &str) -> JobId {
        JobId::new(id).unwrap()
    }

    #[tokio::test]
    async fn miss_calls_model_and_caches_raw_text() {
        let fx = fixture();
        let fenced = format!("```json\n{SUMMARY}\n```");
        let llm = Arc::new(ScriptedLlm::new(vec![(0, Ok(fenced.as_str()))]));
        let coordinator = ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy());

        let outcome = coordinator.extract_job_summary("desc", &job("1")).await;
        assert_eq!(outcome.sequence_id, 1);
        assert_eq!(outcome.result.unwrap().must_haves, vec!["Rust"]);
        assert_eq!(coordinator.state(), ExtractionState::Completed { sequence_id: 1 });

        // The fence is kept: the cache holds what the model said.
        assert_eq!(fx.cache.get("json", &job("1")).await, Some(fenced));
        assert!(fx.kv.snapshot(ResponseCache::NAMESPACE).is_some());

        let again = coordinator.extract_job_summary("desc", &job("1")).await;
        assert!(again.result.is_ok());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_output_fails_without_retry_or_caching() {
        let fx = fixture();
        let llm = Arc::new(ScriptedLlm::new(vec![(0, Ok("I cannot do that."))]));
        let coordinator = ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy());

        let outcome = coordinator.extract_job_summary("desc", &job("1")).await;
        assert!(matches!(outcome.result, Err(ExtractionError::Validation(_))));
        assert_eq!(llm.calls(), 1);
        assert_eq!(fx.cache.len().await, 0);
        assert!(matches!(coordinator.state(), ExtractionState::Failed { sequence_id: 1, .. }));
    }

    #[tokio::test]
    async fn invalid_cached_entry_is_dropped() {
        let fx = fixture();
        fx.cache.put("json", &job("1"), "{\"mustHaves\":\"oops\"}").await;
        let llm = Arc::new(ScriptedLlm::new(vec![(0, Ok(SUMMARY))]));
        let coordinator = ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy());

        let first = coordinator.extract_job_summary("desc", &job("1")).await;
        assert!(matches!(first.result, Err(ExtractionError::Validation(_))));
        assert_eq!(llm.calls(), 0);

        let second = coordinator.extract_job_summary("desc", &job("1")).await;
        assert!(second.result.is_ok());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried() {
        let fx = fixture();
        let llm = Arc::new(ScriptedLlm::new(vec![
            (0, Err(LlmError::Network("reset".into()))),
            (0, Err(LlmError::Api(503, "busy".into()))),
            (0, Ok(SUMMARY)),
        ]));
        let coordinator = ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy());

        let outcome = coordinator.extract_job_summary("desc", &job("1")).await;
        assert!(outcome.result.is_ok());
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let fx = fixture();
        let llm = Arc::new(ScriptedLlm::new(vec![
            (0, Err(LlmError::Network("reset".into()))),
            (0, Err(LlmError::Network("reset".into()))),
            (0, Err(LlmError::Api(500, "boom".into()))),
        ]));
        let coordinator = ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy());

        let outcome = coordinator.extract_job_summary("desc", &job("1")).await;
        assert_eq!(llm.calls(), 3);
        assert_eq!(
            outcome.into_response(),
            BackgroundResponse::err("provider API error (500): boom")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn newer_request_supersedes_older_one() {
        let fx = fixture();
        let llm = Arc::new(ScriptedLlm::new(vec![(5_000, Ok(SUMMARY)), (10, Ok(SUMMARY))]));
        let coordinator = Arc::new(ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy()));

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.extract_job_summary("one", &job("1")).await }
        });
        while coordinator.active_sequence().is_none() {
            tokio::task::yield_now().await;
        }

        let second = coordinator.extract_job_summary("two", &job("2")).await;
        let first = first.await.unwrap();

        assert!(first.is_cancelled());
        assert_eq!(first.into_response(), BackgroundResponse::err("Aborted"));
        assert!(second.result.is_ok());
        assert_eq!(coordinator.state(), ExtractionState::Completed { sequence_id: 2 });
        assert_eq!(fx.cache.get("json", &job("1")).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_result_arriving_late_is_discarded() {
        let fx = fixture();
        let llm = Arc::new(ScriptedLlm {
            ignore_cancel: true,
            ..ScriptedLlm::new(vec![(5_000, Ok(SUMMARY)), (10, Ok(SUMMARY))])
        });
        let coordinator = Arc::new(ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy()));
        let mut states = coordinator.subscribe();

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.extract_job_summary("one", &job("1")).await }
        });
        while coordinator.active_sequence().is_none() {
            tokio::task::yield_now().await;
        }

        let second = coordinator.extract_job_summary("two", &job("2")).await;
        assert!(second.result.is_ok());

        // #1 resolves successfully five seconds later, and changes nothing.
        let first = first.await.unwrap();
        assert!(first.is_cancelled());
        assert_eq!(*states.borrow_and_update(), ExtractionState::Completed { sequence_id: 2 });
        assert_eq!(fx.cache.get("json", &job("1")).await, None);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_active_aborts_running_request() {
        let fx = fixture();
        let llm = Arc::new(ScriptedLlm::new(vec![(60_000, Ok(SUMMARY))]));
        let coordinator = Arc::new(ExtractionCoordinator::new(llm, fx.cache.clone(), policy()));

        let running = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.extract_job_summary("one", &job("1")).await }
        });
        while coordinator.active_sequence().is_none() {
            tokio::task::yield_now().await;
        }

        assert_eq!(coordinator.cancel_active(), Some(1));
        assert!(running.await.unwrap().is_cancelled());
        assert_eq!(coordinator.state(), ExtractionState::Cancelled { sequence_id: 1 });
        assert_eq!(coordinator.cancel_active(), None);
    }

    #[tokio::test]
    async fn non_retryable_provider_error_fails_fast() {
        let fx = fixture();
        let llm = Arc::new(ScriptedLlm::new(vec![(0, Err(LlmError::NotConfigured("no key".into())))]));
        let coordinator = ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy());

        let outcome = coordinator.extract_job_summary("desc", &job("1")).await;
        assert!(matches!(outcome.result, Err(ExtractionError::Transport(_))));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credentials_are_not_retried() {
        let fx = fixture();
        let llm = Arc::new(ScriptedLlm::new(vec![
            (0, Err(LlmError::Api(401, "API key not valid".into()))),
            (0, Ok(SUMMARY)),
        ]));
        let coordinator = ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy());

        let outcome = coordinator.extract_job_summary("desc", &job("1")).await;
        assert_eq!(
            outcome.result,
            Err(ExtractionError::Transport("provider API error (401): API key not valid".into()))
        );
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried() {
        let fx = fixture();
        let llm = Arc::new(ScriptedLlm::new(vec![
            (0, Err(LlmError::Api(429, "quota".into()))),
            (0, Ok(SUMMARY)),
        ]));
        let coordinator = ExtractionCoordinator::new(llm.clone(), fx.cache.clone(), policy());

        let outcome = coordinator.extract_job_summary("desc", &job("1")).await;
        assert!(outcome.result.is_ok());
        assert_eq!(llm.calls(), 2);
    }
}
