//! Exponential backoff with jitter, aborted by a cancellation token.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Classifies an operation error for [`RetryPolicy::retry`].
pub trait Retryable {
    /// Transient failures worth another attempt.
    fn is_retryable(&self) -> bool;

    /// The operation itself observed cancellation.
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Cancellation was requested before or between attempts.
    #[error("operation cancelled")]
    Cancelled,
    /// The operation failed with an error that must not be retried.
    #[error("{0}")]
    Rejected(E),
    /// Every attempt failed; `last` is the final error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Retry schedule.
///
/// The wait after failed attempt `i` (0-based) is
/// `min(base_delay * 2^i, max_delay)` plus up to `jitter` of that again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(alias = "retries")]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::llm_transport()
    }
}

impl RetryPolicy {
    /// Provider calls: 3 attempts, 1 s base, 20 % jitter.
    pub const fn llm_transport() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry maxAttempts must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("retry jitter must be within [0, 1], got {}", self.jitter));
        }
        Ok(())
    }

    /// Delay before the attempt that follows failed attempt `attempt_index`, without jitter.
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt_index).unwrap_or(u64::MAX);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms.max(self.base_delay_ms));
        Duration::from_millis(delay_ms)
    }

    fn jittered_backoff(&self, attempt_index: u32) -> Duration {
        let delay = self.backoff(attempt_index);
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(extra)
    }

    /// Run `operation` until it succeeds, fails terminally or attempts run out.
    ///
    /// Cancellation is checked before every attempt, after every failure and
    /// throughout each wait; it always wins over retrying.
    pub async fn retry<T, E, F, Fut>(
        &self,
        mut operation: F,
        token: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            if token.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;

            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if token.is_cancelled() || err.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            if !err.is_retryable() {
                tracing::warn!(attempt, error = %err, "operation failed with a terminal error");
                return Err(RetryError::Rejected(err));
            }
            if attempt >= max_attempts {
                tracing::error!(attempts = attempt, error = %err, "operation failed, retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.jittered_backoff(attempt - 1);
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );

            tokio::select! {
                _ = token.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
