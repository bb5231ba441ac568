//! Summary panel state and the processor that drives it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use jobscout_core::{BackgroundResponse, JobId, JobSummary};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::page::{JobPage, PageError, wait_for_description};

pub const UNREADABLE_DESCRIPTION: &str = "Job description is empty or could not be read.";
pub const ABORTED: &str = "Aborted";

/// What the panel shows. Exactly one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelState {
    Hidden,
    NoJobSelected,
    Loading { job_id: JobId },
    Summary { job_id: JobId, summary: JobSummary },
    Failed { job_id: JobId, message: String },
}

impl PanelState {
    /// The refresh button is offered only after a failure.
    pub fn can_refresh(&self) -> bool {
        matches!(self, PanelState::Failed { .. })
    }
}

/// Where summaries come from (the background service, over messaging).
#[async_trait]
pub trait SummaryService: Send + Sync {
    async fn extract_job_summary(&self, text: &str, job_id: &JobId) -> BackgroundResponse<JobSummary>;
}

struct Run {
    generation: u64,
    job_id: Option<JobId>,
    token: CancellationToken,
}

/// Runs one extraction per job selection and publishes [`PanelState`].
///
/// Each run bumps a generation counter; a run only publishes while its
/// generation is current, so a superseded run can never overwrite the panel.
pub struct SummaryProcessor<P: JobPage> {
    page: Arc<P>,
    service: Arc<dyn SummaryService>,
    wait_timeout: Duration,
    current: Mutex<Run>,
    panel: watch::Sender<PanelState>,
}

impl<P: JobPage> SummaryProcessor<P> {
    pub fn new(page: Arc<P>, service: Arc<dyn SummaryService>, wait_timeout: Duration) -> Self {
        Self {
            page,
            service,
            wait_timeout,
            current: Mutex::new(Run {
                generation: 0,
                job_id: None,
                token: CancellationToken::new(),
            }),
            panel: watch::Sender::new(PanelState::Hidden),
        }
    }

    pub fn panel(&self) -> PanelState {
        self.panel.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PanelState> {
        self.panel.subscribe()
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.lock().job_id.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Run> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a run, superseding the previous one.
    fn begin(&self, job_id: Option<JobId>) -> (u64, CancellationToken) {
        let mut run = self.lock();
        run.token.cancel();
        run.generation += 1;
        run.job_id = job_id;
        run.token = CancellationToken::new();
        (run.generation, run.token.clone())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Publish `state` if `generation` is still current.
    fn publish(&self, generation: u64, state: PanelState) -> bool {
        let run = self.lock();
        if run.generation != generation {
            tracing::debug!(generation, current = run.generation, "dropping stale panel update");
            return false;
        }
        self.panel.send_replace(state);
        true
    }

    /// Summarize `job_id`, or show "no job selected" for `None`.
    ///
    /// An `Aborted` reply is dropped when this run was superseded here; if the
    /// run is still current it is shown as a refreshable failure.
    pub async fn run_extraction(&self, job_id: Option<JobId>) {
        let (generation, token) = self.begin(job_id.clone());

        let Some(job_id) = job_id else {
            self.publish(generation, PanelState::NoJobSelected);
            return;
        };
        self.publish(generation, PanelState::Loading { job_id: job_id.clone() });

        let text = match wait_for_description(self.page.as_ref(), self.wait_timeout, &token).await {
            Ok(text) => text,
            Err(PageError::Cancelled) => return,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "job description unavailable");
                self.publish(
                    generation,
                    PanelState::Failed {
                        job_id,
                        message: UNREADABLE_DESCRIPTION.to_string(),
                    },
                );
                return;
            }
        };

        let response = self.service.extract_job_summary(&text, &job_id).await;
        let next = match response {
            BackgroundResponse::Success(summary) => PanelState::Summary { job_id, summary },
            BackgroundResponse::Failure(message) if message == ABORTED && !self.is_current(generation) => {
                tracing::debug!(job_id = %job_id, generation, "extraction superseded");
                return;
            }
            BackgroundResponse::Failure(message) => PanelState::Failed { job_id, message },
        };
        self.publish(generation, next);
    }

    /// Re-run the current job. Returns `false` when no job is selected.
    pub async fn refresh(&self) -> bool {
        match self.current_job() {
            Some(job_id) => {
                self.run_extraction(Some(job_id)).await;
                true
            }
            None => {
                tracing::warn!("refresh requested with no current job");
                false
            }
        }
    }

    /// Cancel whatever is running and hide the panel.
    pub fn clear(&self) {
        let mut run = self.lock();
        run.token.cancel();
        run.generation += 1;
        run.job_id = None;
        self.panel.send_replace(PanelState::Hidden);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::fake::FakePage;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers per job id after a per-job delay.
    #[derive(Default)]
    struct FakeService {
        replies: Mutex<HashMap<String, (Duration, BackgroundResponse<JobSummary>)>>,
        calls: AtomicUsize,
    }

    impl FakeService {
        fn reply(&self, job: &str, delay_ms: u64, response: BackgroundResponse<JobSummary>) {
            self.replies
                .lock()
                .unwrap()
                .insert(job.to_string(), (Duration::from_millis(delay_ms), response));
        }
    }

    #[async_trait]
    impl SummaryService for FakeService {
        async fn extract_job_summary(&self, _text: &str, job_id: &JobId) -> BackgroundResponse<JobSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().get(job_id.as_str()).cloned();
            match reply {
                Some((delay, response)) => {
                    tokio::time::sleep(delay).await;
                    response
                }
                None => BackgroundResponse::err("no reply"),
            }
        }
    }

    fn summary(skill: &str) -> JobSummary {
        JobSummary {
            must_haves: vec![skill.to_string()],
            ..JobSummary::default()
        }
    }

    fn job(id: &str) -> JobId {
        JobId::new(id).unwrap()
    }

    fn setup() -> (Arc<FakePage>, Arc<FakeService>, Arc<SummaryProcessor<FakePage>>) {
        let page = Arc::new(FakePage::new("https://www.linkedin.com/jobs/search/"));
        page.set_description(Some("We need Rust."));
        let service = Arc::new(FakeService::default());
        let processor = Arc::new(SummaryProcessor::new(
            page.clone(),
            service.clone(),
            Duration::from_secs(5),
        ));
        (page, service, processor)
    }

    #[tokio::test]
    async fn shows_summary_on_success() {
        let (_page, service, processor) = setup();
        service.reply("1", 0, BackgroundResponse::ok(summary("Rust")));

        processor.run_extraction(Some(job("1"))).await;
        assert_eq!(
            processor.panel(),
            PanelState::Summary { job_id: job("1"), summary: summary("Rust") }
        );
        assert!(!processor.panel().can_refresh());
    }

    #[tokio::test]
    async fn no_job_shows_no_job_selected() {
        let (_page, service, processor) = setup();
        processor.run_extraction(None).await;
        assert_eq!(processor.panel(), PanelState::NoJobSelected);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_is_shown_and_refreshable() {
        let (_page, service, processor) = setup();
        service.reply("1", 0, BackgroundResponse::err("quota exceeded"));

        processor.run_extraction(Some(job("1"))).await;
        let panel = processor.panel();
        assert_eq!(panel, PanelState::Failed { job_id: job("1"), message: "quota exceeded".into() });
        assert!(panel.can_refresh());

        service.reply("1", 0, BackgroundResponse::ok(summary("Go")));
        assert!(processor.refresh().await);
        assert!(matches!(processor.panel(), PanelState::Summary { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_page_fails_with_fixed_message() {
        let (page, service, processor) = setup();
        page.set_description(None);

        processor.run_extraction(Some(job("1"))).await;
        assert_eq!(
            processor.panel(),
            PanelState::Failed { job_id: job("1"), message: UNREADABLE_DESCRIPTION.into() }
        );
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn aborted_reply_for_current_run_is_refreshable() {
        let (_page, service, processor) = setup();
        service.reply("1", 0, BackgroundResponse::err(ABORTED));

        processor.run_extraction(Some(job("1"))).await;
        let panel = processor.panel();
        assert_eq!(panel, PanelState::Failed { job_id: job("1"), message: ABORTED.to_string() });
        assert!(panel.can_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_reply_for_superseded_run_is_swallowed() {
        let (_page, service, processor) = setup();
        service.reply("old", 5_000, BackgroundResponse::err(ABORTED));
        service.reply("new", 10, BackgroundResponse::ok(summary("Fresh")));

        let old = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run_extraction(Some(job("old"))).await }
        });
        while service.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        processor.run_extraction(Some(job("new"))).await;
        old.await.unwrap();

        assert_eq!(
            processor.panel(),
            PanelState::Summary { job_id: job("new"), summary: summary("Fresh") }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_result_never_reaches_the_panel() {
        let (_page, service, processor) = setup();
        service.reply("slow", 5_000, BackgroundResponse::ok(summary("Stale")));
        service.reply("fast", 10, BackgroundResponse::ok(summary("Fresh")));
        let mut panel = processor.subscribe();

        let slow = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run_extraction(Some(job("slow"))).await }
        });
        // Let the slow run reach the service call.
        while service.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        processor.run_extraction(Some(job("fast"))).await;
        slow.await.unwrap();

        assert_eq!(
            *panel.borrow_and_update(),
            PanelState::Summary { job_id: job("fast"), summary: summary("Fresh") }
        );
        assert_eq!(processor.current_job(), Some(job("fast")));
    }

    #[tokio::test]
    async fn refresh_without_job_does_nothing() {
        let (_page, service, processor) = setup();
        assert!(!processor.refresh().await);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_hides_panel() {
        let (_page, service, processor) = setup();
        service.reply("1", 0, BackgroundResponse::ok(summary("Rust")));
        processor.run_extraction(Some(job("1"))).await;

        processor.clear();
        assert_eq!(processor.panel(), PanelState::Hidden);
        assert_eq!(processor.current_job(), None);
    }
}
