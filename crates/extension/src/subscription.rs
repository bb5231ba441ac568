//! Subscription status lookup against the billing backend.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Body of `GET /subscription-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Epoch seconds.
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

impl SubscriptionStatus {
    /// Paid features are available.
    pub fn is_entitled(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }

    /// Last day of access, reported only for subscriptions set to cancel.
    pub fn ends_on(&self) -> Option<NaiveDate> {
        if !self.cancel_at_period_end {
            return None;
        }
        self.current_period_end
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|end| end.date_naive())
    }
}

/// Source of subscription status for a bearer token.
#[async_trait]
pub trait SubscriptionApi: Send + Sync + core::fmt::Debug {
    async fn status(&self, token: &str) -> Result<SubscriptionStatus, SubscriptionError>;
}

/// HTTP client for the billing backend.
#[derive(Debug, Clone)]
pub struct SubscriptionClient {
    http: reqwest::Client,
    api_url: String,
}

impl SubscriptionClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SubscriptionApi for SubscriptionClient {
    async fn status(&self, token: &str) -> Result<SubscriptionStatus, SubscriptionError> {
        let url = format!("{}/subscription-status", self.api_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SubscriptionError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SubscriptionError::Api(
                resp.status().as_u16(),
                resp.text().await.unwrap_or_default(),
            ));
        }

        resp.json()
            .await
            .map_err(|e| SubscriptionError::Parse(e.to_string()))
    }
}
