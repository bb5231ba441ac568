//! Provider-neutral model client.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::gemini::GeminiClient;
use crate::ollama::OllamaClient;

/// Output format requested from the model; also part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Json,
    Text,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Text => "text",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model that turns a prompt into raw text.
///
/// Implementations return the payload text only; parsing it is the caller's
/// job. A cancelled `token` must resolve the call with [`LlmError::Cancelled`].
#[async_trait]
pub trait LlmClient: Send + Sync + fmt::Debug {
    async fn complete(
        &self,
        prompt: &str,
        format: ResponseFormat,
        token: &CancellationToken,
    ) -> Result<String, LlmError>;
}

/// Which provider to call, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum LlmProviderConfig {
    Ollama {
        url: String,
        model: String,
    },
    Gemini {
        #[serde(default)]
        api_key: String,
        model: String,
        #[serde(default = "default_gemini_base_url")]
        base_url: String,
    },
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self::gemini("")
    }
}

fn default_gemini_base_url() -> String {
    GeminiClient::DEFAULT_BASE_URL.to_string()
}

impl LlmProviderConfig {
    pub fn ollama() -> Self {
        Self::Ollama {
            url: OllamaClient::DEFAULT_URL.to_string(),
            model: OllamaClient::DEFAULT_MODEL.to_string(),
        }
    }

    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self::Gemini {
            api_key: api_key.into(),
            model: GeminiClient::DEFAULT_MODEL.to_string(),
            base_url: default_gemini_base_url(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProviderConfig::Ollama { .. } => "ollama",
            LlmProviderConfig::Gemini { .. } => "gemini",
        }
    }

    /// Whether calls can succeed at all (a Gemini key is present).
    pub fn is_configured(&self) -> bool {
        match self {
            LlmProviderConfig::Ollama { .. } => true,
            LlmProviderConfig::Gemini { api_key, .. } => !api_key.trim().is_empty(),
        }
    }

    pub fn build(&self) -> Arc<dyn LlmClient> {
        if !self.is_configured() {
            tracing::error!(provider = self.name(), "model provider API key is not set; extraction will fail");
        }
        match self {
            LlmProviderConfig::Ollama { url, model } => Arc::new(OllamaClient::new(url.clone(), model.clone())),
            LlmProviderConfig::Gemini {
                api_key,
                model,
                base_url,
            } => Arc::new(GeminiClient::new(api_key.clone(), model.clone()).with_base_url(base_url.clone())),
        }
    }
}

/// Race `fut` against `token`.
pub(crate) async fn cancellable<F: Future>(token: &CancellationToken, fut: F) -> Result<F::Output, LlmError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LlmError::Cancelled),
        output = fut => Ok(output),
    }
}

/// Flatten a reqwest error without the request URL (it may carry an API key).
pub(crate) fn network_error(err: reqwest::Error) -> LlmError {
    LlmError::Network(err.without_url().to_string())
}
