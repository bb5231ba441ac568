use jobscout_core::DomainError;
use thiserror::Error;

use crate::retry::{RetryError, Retryable};

/// Failure of a single provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider API error ({0}): {1}")]
    Api(u16, String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("request cancelled")]
    Cancelled,
}

impl Retryable for LlmError {
    /// Client errors (4xx) other than timeouts and rate limits won't go away on retry.
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::InvalidResponse(_) => true,
            LlmError::Api(status, _) => !(400..500).contains(status) || matches!(status, 408 | 429),
            LlmError::NotConfigured(_) | LlmError::Cancelled => false,
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}

/// Why an extraction produced no summary.
///
/// `Cancelled` renders as `Aborted`, the marker the presentation side
/// filters out instead of showing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Validation(String),
    #[error("Aborted")]
    Cancelled,
    #[error("{0}")]
    Timeout(String),
}

impl ExtractionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExtractionError::Cancelled)
    }
}

impl From<LlmError> for ExtractionError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => ExtractionError::Cancelled,
            other => ExtractionError::Transport(other.to_string()),
        }
    }
}

impl From<RetryError<LlmError>> for ExtractionError {
    fn from(err: RetryError<LlmError>) -> Self {
        match err {
            RetryError::Cancelled => ExtractionError::Cancelled,
            RetryError::Rejected(last) => last.into(),
            RetryError::Exhausted { last, .. } => last.into(),
        }
    }
}

impl From<DomainError> for ExtractionError {
    fn from(err: DomainError) -> Self {
        ExtractionError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(LlmError::Network("reset".into()).is_retryable());
        assert!(LlmError::Api(503, "busy".into()).is_retryable());
        assert!(LlmError::Api(429, "slow down".into()).is_retryable());
        assert!(LlmError::Api(408, "timeout".into()).is_retryable());
        assert!(!LlmError::Api(400, "bad request".into()).is_retryable());
        assert!(!LlmError::Api(401, "bad key".into()).is_retryable());
        assert!(!LlmError::Api(403, "forbidden".into()).is_retryable());
        assert!(LlmError::InvalidResponse("no text".into()).is_retryable());
        assert!(!LlmError::NotConfigured("no key".into()).is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
        assert!(LlmError::Cancelled.is_cancelled());
    }

    #[test]
    fn cancellation_displays_as_aborted() {
        assert_eq!(ExtractionError::Cancelled.to_string(), "Aborted");
        assert_eq!(ExtractionError::from(LlmError::Cancelled), ExtractionError::Cancelled);
        assert_eq!(
            ExtractionError::from(RetryError::<LlmError>::Cancelled),
            ExtractionError::Cancelled
        );
    }

    #[test]
    fn exhausted_retries_surface_the_last_error() {
        let err = ExtractionError::from(RetryError::Exhausted {
            attempts: 3,
            last: LlmError::Api(500, "boom".into()),
        });
        assert_eq!(err, ExtractionError::Transport("provider API error (500): boom".into()));
    }
}
