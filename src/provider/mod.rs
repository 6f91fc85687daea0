use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::{ModelConfig, ModelsConfig};
use crate::error::Error;

/// A replaceable text-generation capability: ordered role-tagged messages
/// in, generated text out. Both the chat model and the vision model sit
/// behind this trait; vision calls just carry image parts in the content.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn generate(&self, messages: &[serde_json::Value]) -> Result<String, Error>;
}

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatModel {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
}

impl OpenAiCompatModel {
    pub fn new(models: &ModelsConfig, model: &ModelConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: models.base_url.trim_end_matches('/').to_string(),
            api_key: models.api_key.clone(),
            model: model.model.clone(),
            max_tokens: model.max_tokens,
            temperature: model.temperature,
            timeout: Duration::from_secs(models.timeout_secs),
        }
    }

    /// The configured vision model.
    pub fn vision(models: &ModelsConfig) -> Self {
        Self::new(models, &models.vision)
    }

    /// The configured chat model.
    pub fn chat(models: &ModelsConfig) -> Self {
        Self::new(models, &models.chat)
    }
}

#[async_trait]
impl CompletionModel for OpenAiCompatModel {
    async fn generate(&self, messages: &[serde_json::Value]) -> Result<String, Error> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        debug!(model = %self.model, "calling completion endpoint");

        let response = request
            .send()
            .await
            .map_err(|e| Error::upstream(format!("model request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::upstream(format!("{status}: {text}")));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::upstream(format!("unreadable model response: {e}")))?;

        parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| Error::upstream("malformed completion response"))
    }
}
