//! Chat completions against an OpenAI-compatible serving endpoint
//! (OpenAI, Ollama, vLLM, Databricks model serving, ...).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ChatMessage, ChatModel, GenerationConfig};

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAICompatibleChat {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAICompatibleChat {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        let model = model.into();
        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        tracing::info!(
            endpoint = %endpoint,
            model = %model,
            "Creating OpenAI-compatible chat client"
        );

        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
        })
    }

    /// Parse a response body, returning a clear error if the server returned HTML
    /// (e.g. a gateway error page) or no usable completion.
    fn parse_completion(body: &str, endpoint: &str) -> Result<String> {
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "Endpoint {} returned HTML instead of JSON: {}",
                endpoint,
                preview
            ));
        }

        let response: OpenAIResponse = serde_json::from_str(body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!("Failed to parse JSON from {}: {}. Response body: {}", endpoint, e, preview)
        })?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("No completion content returned from {}", endpoint))
    }
}

#[async_trait]
impl ChatModel for OpenAICompatibleChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<String> {
        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            messages = messages.len(),
            max_tokens = config.max_tokens,
            "Sending chat completion request"
        );

        let request = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "stream": false
        });

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::error!(endpoint = %self.endpoint, "Chat request timed out");
                anyhow!("Request to {} timed out", self.endpoint)
            } else if e.is_connect() {
                tracing::error!(endpoint = %self.endpoint, error = %e, "Connection failed");
                anyhow!("Failed to connect to {}: {}", self.endpoint, e)
            } else {
                anyhow!("Request to {} failed: {}", self.endpoint, e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(endpoint = %self.endpoint, status = %status, error = %body, "API returned error");
            return Err(anyhow!("API error ({}): {}", status, body));
        }

        Self::parse_completion(&body, &self.endpoint)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
