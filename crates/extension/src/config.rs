//! Runtime configuration for the background service and content side.

use std::time::Duration;

use jobscout_ai::{LlmProviderConfig, RetryPolicy};
use jobscout_storage::{ConfigError, StoreConfig};
use serde::{Deserialize, Serialize};

use crate::job_list::{DisplayMode, DisplayPreferences};

const ONE_DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Everything the extension can be tuned with.
///
/// Deserializes from camelCase JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionConfig {
    pub response_cache: StoreConfig,
    pub dismissed_jobs: StoreConfig,
    pub retry: RetryPolicy,
    pub llm: LlmProviderConfig,
    /// Navigation under this prefix is tracked.
    pub jobs_url_prefix: String,
    /// Query parameter carrying the open job's id.
    pub job_id_param: String,
    pub page_wait_timeout_ms: u64,
    pub prune_interval_ms: u64,
    /// Base URL of the subscription backend.
    pub backend_url: String,
    pub display: DisplayPreferences,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            response_cache: StoreConfig::response_cache(),
            dismissed_jobs: StoreConfig::dismissed_jobs(),
            retry: RetryPolicy::llm_transport(),
            llm: LlmProviderConfig::default(),
            jobs_url_prefix: "https://www.linkedin.com/jobs/search/".to_string(),
            job_id_param: "currentJobId".to_string(),
            page_wait_timeout_ms: 5_000,
            prune_interval_ms: ONE_DAY_MS,
            backend_url: "http://localhost:3000".to_string(),
            display: DisplayPreferences::default(),
        }
    }
}

impl ExtensionConfig {
    /// Defaults overlaid with `JOBSCOUT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, then validated.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(provider) = lookup("JOBSCOUT_LLM_PROVIDER") {
            match provider.trim().to_ascii_lowercase().as_str() {
                "ollama" => config.llm = LlmProviderConfig::ollama(),
                "gemini" => config.llm = LlmProviderConfig::default(),
                other => tracing::warn!(value = other, "JOBSCOUT_LLM_PROVIDER not recognised; keeping default"),
            }
        }
        match &mut config.llm {
            LlmProviderConfig::Ollama { url, model } => {
                overlay_string(&lookup, "JOBSCOUT_OLLAMA_URL", url);
                overlay_string(&lookup, "JOBSCOUT_OLLAMA_MODEL", model);
            }
            LlmProviderConfig::Gemini {
                api_key,
                model,
                base_url,
            } => {
                overlay_string(&lookup, "JOBSCOUT_GEMINI_API_KEY", api_key);
                overlay_string(&lookup, "JOBSCOUT_GEMINI_MODEL", model);
                overlay_string(&lookup, "JOBSCOUT_GEMINI_BASE_URL", base_url);
            }
        }

        overlay_parsed(&lookup, "JOBSCOUT_CACHE_MAX_ITEMS", &mut config.response_cache.max_items);
        overlay_parsed(&lookup, "JOBSCOUT_CACHE_TTL_MS", &mut config.response_cache.ttl_ms);
        overlay_parsed(&lookup, "JOBSCOUT_DISMISSED_MAX_ITEMS", &mut config.dismissed_jobs.max_items);
        overlay_parsed(&lookup, "JOBSCOUT_DISMISSED_TTL_MS", &mut config.dismissed_jobs.ttl_ms);
        overlay_parsed(&lookup, "JOBSCOUT_RETRY_ATTEMPTS", &mut config.retry.max_attempts);
        overlay_parsed(&lookup, "JOBSCOUT_RETRY_BASE_DELAY_MS", &mut config.retry.base_delay_ms);
        overlay_parsed(&lookup, "JOBSCOUT_PAGE_WAIT_TIMEOUT_MS", &mut config.page_wait_timeout_ms);
        overlay_parsed(&lookup, "JOBSCOUT_PRUNE_INTERVAL_MS", &mut config.prune_interval_ms);
        overlay_string(&lookup, "JOBSCOUT_BACKEND_URL", &mut config.backend_url);
        overlay_string(&lookup, "JOBSCOUT_JOBS_URL_PREFIX", &mut config.jobs_url_prefix);
        overlay_parsed(&lookup, "JOBSCOUT_DISPLAY_VIEWED", &mut config.display.viewed_jobs);
        overlay_parsed(&lookup, "JOBSCOUT_DISPLAY_APPLIED", &mut config.display.applied_jobs);
        overlay_parsed(&lookup, "JOBSCOUT_DISPLAY_DISMISSED", &mut config.display.dismissed_jobs);

        config.validate()?;
        if !config.llm.is_configured() {
            tracing::warn!(provider = config.llm.name(), "model provider API key is not set");
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.response_cache.validate()?;
        self.dismissed_jobs.validate()?;
        self.retry.validate().map_err(ConfigError::invalid)?;

        url::Url::parse(&self.jobs_url_prefix)
            .map_err(|e| ConfigError::invalid(format!("jobsUrlPrefix is not a URL: {e}")))?;
        url::Url::parse(&self.backend_url)
            .map_err(|e| ConfigError::invalid(format!("backendUrl is not a URL: {e}")))?;
        if self.job_id_param.trim().is_empty() {
            return Err(ConfigError::invalid("jobIdParam must not be empty"));
        }
        if self.page_wait_timeout_ms == 0 {
            return Err(ConfigError::invalid("pageWaitTimeoutMs must be greater than zero"));
        }
        if self.prune_interval_ms == 0 {
            return Err(ConfigError::invalid("pruneIntervalMs must be greater than zero"));
        }
        Ok(())
    }

    pub fn page_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.page_wait_timeout_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

fn overlay_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut String) {
    if let Some(value) = lookup(key) {
        let value = value.trim();
        if value.is_empty() {
            tracing::warn!(key, "empty value ignored");
        } else {
            *target = value.to_string();
        }
    }
}

fn overlay_parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "unparsable value ignored"),
        }
    }
}
