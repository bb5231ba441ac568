//! Google Gemini `generateContent` endpoint.

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::client::{LlmClient, ResponseFormat, cancellable, network_error};
use crate::error::LlmError;

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

// Keeps the key out of logs.
impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key_set", &!self.api_key.trim().is_empty())
            .finish()
    }
}

impl GeminiClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-flash";

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(prompt: &str, format: ResponseFormat) -> Value {
        let mime = match format {
            ResponseFormat::Json => "application/json",
            ResponseFormat::Text => "text/plain",
        };
        json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0,
                "responseMimeType": mime,
            },
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(
        &self,
        prompt: &str,
        format: ResponseFormat,
        token: &CancellationToken,
    ) -> Result<String, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::NotConfigured("Gemini API key is not set".to_string()));
        }
        tracing::debug!(model = %self.model, %format, "calling gemini");

        let request = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(prompt, format))
            .send();
        let response = cancellable(token, request).await?.map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = cancellable(token, response.text()).await?.unwrap_or_default();
            return Err(LlmError::Api(status.as_u16(), text));
        }

        let data: Value = cancellable(token, response.json())
            .await?
            .map_err(|e| LlmError::InvalidResponse(e.without_url().to_string()))?;

        if let Some(text) = data
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Ok(text.to_owned());
        }

        let message = data
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("response has no candidate text");
        Err(LlmError::InvalidResponse(format!("Gemini API error: {message}")))
    }
}
