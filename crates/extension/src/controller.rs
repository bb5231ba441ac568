//! Content side of one tab: wires the page, the job list and the panel.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jobscout_core::JobId;
use jobscout_storage::DismissedSet;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::background::ContentCommand;
use crate::config::ExtensionConfig;
use crate::job_list::{JobListHost, JobListObserver};
use crate::navigation::job_id_from_str;
use crate::page::{JobPage, PageError, wait_for_job_list};
use crate::panel::{PanelState, SummaryProcessor, SummaryService};

pub struct ContentController<P: JobPage + 'static, H: JobListHost + 'static> {
    page: Arc<P>,
    processor: Arc<SummaryProcessor<P>>,
    observer: Arc<JobListObserver<H>>,
    job_param: String,
    wait_timeout: Duration,
    runs: Mutex<JoinSet<()>>,
}

impl<P: JobPage + 'static, H: JobListHost + 'static> ContentController<P, H> {
    pub fn new(
        page: Arc<P>,
        host: Arc<H>,
        service: Arc<dyn SummaryService>,
        dismissed: Arc<DismissedSet>,
        config: &ExtensionConfig,
    ) -> Self {
        let wait_timeout = config.page_wait_timeout();
        Self {
            processor: Arc::new(SummaryProcessor::new(page.clone(), service, wait_timeout)),
            observer: Arc::new(JobListObserver::new(host, dismissed, config.display)),
            page,
            job_param: config.job_id_param.clone(),
            wait_timeout,
            runs: Mutex::new(JoinSet::new()),
        }
    }

    pub fn processor(&self) -> &Arc<SummaryProcessor<P>> {
        &self.processor
    }

    pub fn observer(&self) -> &Arc<JobListObserver<H>> {
        &self.observer
    }

    pub fn panel(&self) -> PanelState {
        self.processor.panel()
    }

    /// Wait for the job list, start observing it and summarize the job
    /// already open in the URL, if any.
    pub async fn start(&self, token: &CancellationToken) -> Result<(), PageError> {
        if let Err(e) = wait_for_job_list(self.page.as_ref(), self.wait_timeout, token).await {
            tracing::warn!(error = %e, "job list never appeared; content side idle");
            return Err(e);
        }
        self.observer.start().await;

        match job_id_from_str(&self.page.current_url(), &self.job_param) {
            Some(job_id) => {
                tracing::info!(job_id = %job_id, "initial job found in page URL");
                self.spawn_run(Some(job_id));
            }
            None => tracing::debug!("no job open at start"),
        }
        Ok(())
    }

    /// React to a command from the background service.
    ///
    /// Returns `true` when a new extraction was started.
    pub fn on_command(&self, command: ContentCommand) -> bool {
        match command {
            ContentCommand::UrlUpdated { job_id } => self.on_url_updated(job_id),
        }
    }

    fn on_url_updated(&self, job_id: Option<JobId>) -> bool {
        if job_id.is_some() && job_id == self.processor.current_job() {
            tracing::debug!("URL updated to the job already shown");
            return false;
        }
        match &job_id {
            Some(id) => tracing::info!(job_id = %id, "job changed"),
            None => tracing::info!("job closed"),
        }
        self.spawn_run(job_id);
        true
    }

    /// The refresh button. Returns `false` when there is nothing to refresh.
    pub fn handle_refresh(&self) -> bool {
        if !self.processor.panel().can_refresh() || self.processor.current_job().is_none() {
            return false;
        }
        let processor = self.processor.clone();
        self.spawn_tracked(async move {
            processor.refresh().await;
        });
        true
    }

    /// Process commands until the channel closes or `token` is cancelled.
    pub async fn run(&self, mut commands: mpsc::UnboundedReceiver<ContentCommand>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => {
                        self.on_command(command);
                    }
                    None => break,
                },
            }
        }
        let mut runs = mem::take(&mut *self.lock_runs());
        runs.shutdown().await;
        self.processor.clear();
        self.observer.flush().await;
        tracing::debug!("content controller stopped");
    }

    /// Wait for every extraction spawned so far, and for pending list writes.
    pub async fn settle(&self) {
        let mut runs = mem::take(&mut *self.lock_runs());
        while let Some(result) = runs.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "extraction task failed");
            }
        }
        self.observer.flush().await;
    }

    fn spawn_run(&self, job_id: Option<JobId>) {
        let processor = self.processor.clone();
        self.spawn_tracked(async move {
            processor.run_extraction(job_id).await;
        });
    }

    /// Spawn onto the run set, first reaping runs that already finished.
    fn spawn_tracked<F>(&self, run: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut runs = self.lock_runs();
        while let Some(result) = runs.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "extraction task failed");
            }
        }
        runs.spawn(run);
    }

    #[cfg(test)]
    fn tracked_runs(&self) -> usize {
        self.lock_runs().len()
    }

    fn lock_runs(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
