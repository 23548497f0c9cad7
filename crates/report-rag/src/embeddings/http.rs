//! Embeddings from an OpenAI-compatible `/embeddings` endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingModel;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct HttpEmbeddings {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbeddings {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .build()?;

        let model = model.into();
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        tracing::info!(
            endpoint = %endpoint,
            model = %model,
            dimension,
            "Creating HTTP embedding client"
        );

        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
            dimension,
        })
    }

    fn parse_embedding(&self, body: &str) -> Result<Vec<f32>> {
        let response: EmbeddingResponse = serde_json::from_str(body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!("Failed to parse embedding response: {}. Body: {}", e, preview)
        })?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("Embedding response contained no vectors"))?;

        if embedding.len() != self.dimension {
            return Err(anyhow!(
                "Embedding dimension {} does not match configured dimension {}",
                embedding.len(),
                self.dimension
            ));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddings {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            input: vec![text],
            model: &self.model,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow!("Embedding request to {} timed out", self.endpoint)
            } else {
                anyhow!("Embedding request to {} failed: {}", self.endpoint, e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(endpoint = %self.endpoint, status = %status, "Embedding endpoint returned error");
            return Err(anyhow!("Embedding API error ({}): {}", status, body));
        }

        self.parse_embedding(&body)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
