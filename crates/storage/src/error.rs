//! Storage error model.

use thiserror::Error;

/// Failure reading or writing persisted state.
///
/// Stores log these and fall back; they are surfaced only by the raw
/// [`KvBackend`](crate::KvBackend) API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for StorageError {
    fn from(err: anyhow::Error) -> Self {
        Self::Backend(format!("{err:#}"))
    }
}
