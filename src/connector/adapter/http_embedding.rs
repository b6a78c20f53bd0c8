use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http_record_source::{classify_request_error, classify_status_with};
use crate::application::EmbeddingService;
use crate::domain::{DomainError, EmbeddingConfig};

/// Client for Voyage-compatible embedding APIs (`POST {input, model}`).
pub struct HttpEmbedding {
    client: Client,
    endpoint: String,
    api_key: String,
    config: EmbeddingConfig,
}

impl HttpEmbedding {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        config: EmbeddingConfig,
        timeout: Duration,
    ) -> Result<Self, DomainError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(DomainError::fatal_config("missing embedding API key"));
        }
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(DomainError::fatal_config(format!(
                "embedding endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::fatal_config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.trim().to_string(),
            config,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingResponse {
    fn into_vectors(self, expected_len: usize) -> Result<Vec<Vec<f32>>, DomainError> {
        if self.data.len() != expected_len {
            return Err(DomainError::embedding(format!(
                "API returned {} embeddings for {} inputs",
                self.data.len(),
                expected_len
            )));
        }
        let mut data = self.data;
        data.sort_by_key(|d| d.index.unwrap_or(0));
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbedding {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, DomainError> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| DomainError::embedding("API returned no embedding"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            input: texts,
            model: self.config.model_name(),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status_with(status, &body, DomainError::embedding));
        }

        let payload: EmbeddingResponse = response.json().await.map_err(|e| {
            DomainError::embedding(format!("Failed to parse embedding response: {}", e))
        })?;
        let vectors = payload.into_vectors(texts.len())?;

        debug!(
            "Generated {} embeddings with {}",
            vectors.len(),
            self.config.model_name()
        );
        Ok(vectors)
    }

    fn config(&self) -> &EmbeddingConfig {
        &self.config
    }
}
