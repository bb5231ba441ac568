//! Local Ollama chat endpoint.

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::client::{LlmClient, ResponseFormat, cancellable, network_error};
use crate::error::LlmError;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub const DEFAULT_URL: &'static str = "http://localhost:11434/api/chat";
    pub const DEFAULT_MODEL: &'static str = "llama3.1";

    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
        }
    }

    fn request_body(&self, prompt: &str, format: ResponseFormat) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
            "options": { "temperature": 0 },
        });
        if format == ResponseFormat::Json {
            body["format"] = json!("json");
        }
        body
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(
        &self,
        prompt: &str,
        format: ResponseFormat,
        token: &CancellationToken,
    ) -> Result<String, LlmError> {
        let body = self.request_body(prompt, format);
        tracing::debug!(model = %self.model, %format, "calling ollama");

        let response = cancellable(token, self.http.post(&self.url).json(&body).send())
            .await?
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = cancellable(token, response.text()).await?.unwrap_or_default();
            return Err(LlmError::Api(status.as_u16(), text));
        }

        let data: Value = cancellable(token, response.json())
            .await?
            .map_err(|e| LlmError::InvalidResponse(e.without_url().to_string()))?;

        data.pointer("/message/content")
            .and_then(Value::as_str)
            .filter(|content| !content.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| LlmError::InvalidResponse("ollama response has no message content".to_string()))
    }
}
