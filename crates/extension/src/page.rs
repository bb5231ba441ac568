//! Waiting on the host page.
//!
//! The page is reached through [`JobPage`]; structural changes are announced
//! on a `watch` channel, the counterpart of a DOM mutation observer.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("{0}")]
    Timeout(String),
    #[error("Aborted")]
    Cancelled,
    #[error("page is no longer available: {0}")]
    Unavailable(String),
}

/// The page the content side runs in.
pub trait JobPage: Send + Sync {
    fn current_url(&self) -> String;

    /// Whether the job list container is present.
    fn has_job_list(&self) -> bool;

    /// Visible text of the job description container; `None` while it is absent.
    fn description_text(&self) -> Option<String>;

    /// Ticks on every structural or text change.
    fn changes(&self) -> watch::Receiver<u64>;
}

/// Resolve with the first `Some` from `check`, re-checking on every change.
async fn wait_until<T>(
    mut changes: watch::Receiver<u64>,
    mut check: impl FnMut() -> Option<T>,
    what: &str,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<T, PageError> {
    if token.is_cancelled() {
        return Err(PageError::Cancelled);
    }

    let wait = async {
        loop {
            let _ = changes.borrow_and_update();
            if let Some(found) = check() {
                return Ok(found);
            }
            if changes.changed().await.is_err() {
                return Err(PageError::Unavailable(format!("{what}: page closed")));
            }
        }
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PageError::Cancelled),
        result = tokio::time::timeout(timeout, wait) => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(PageError::Timeout(format!(
                "{what} not found within {}ms.",
                timeout.as_millis()
            ))),
        },
    }
}

/// Wait until `present` reports the element `what` on `page`.
pub async fn wait_for_element<P: JobPage + ?Sized>(
    page: &P,
    present: impl Fn(&P) -> bool,
    what: &str,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<(), PageError> {
    wait_until(page.changes(), || present(page).then_some(()), what, timeout, token).await
}

/// Wait until `read` yields text that is not just whitespace.
pub async fn wait_for_content<P: JobPage + ?Sized>(
    page: &P,
    read: impl Fn(&P) -> Option<String>,
    what: &str,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<String, PageError> {
    wait_until(
        page.changes(),
        || read(page).filter(|text| !text.trim().is_empty()),
        what,
        timeout,
        token,
    )
    .await
}

/// Wait until the job list container exists.
pub async fn wait_for_job_list<P: JobPage + ?Sized>(
    page: &P,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<(), PageError> {
    wait_for_element(page, P::has_job_list, "Job list", timeout, token).await
}

/// Wait for the description container, then for it to hold text.
///
/// Each phase gets its own `timeout`.
pub async fn wait_for_description<P: JobPage + ?Sized>(
    page: &P,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<String, PageError> {
    wait_for_element(
        page,
        |page| page.description_text().is_some(),
        "Job description",
        timeout,
        token,
    )
    .await?;

    wait_for_content(page, P::description_text, "Job description content", timeout, token).await
}
