//! OpenAI-compatible `/embeddings` client

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{KeepsakeError, Result};
use crate::resilience::{CircuitBreaker, RetryPolicy, post_json};

pub struct RemoteEmbedder {
    client: Client,
    url: String,
    model: String,
    dimension: usize,
    api_key: String,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl RemoteEmbedder {
    /// Reads the API key from the environment variable named in the config
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            KeepsakeError::Config(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        if config.api_url.is_empty() {
            return Err(KeepsakeError::Config(
                "embedding.api_url is required for the remote provider".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KeepsakeError::Embedding(e.to_string()))?;

        info!(
            "RemoteEmbedder initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            url: format!("{}/embeddings", config.api_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimension,
            api_key: api_key.into(),
            retry: RetryPolicy::new(config.max_retries, Duration::from_secs(1)),
            breaker: CircuitBreaker::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KeepsakeError::Embedding("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = post_json(
            &self.client,
            &self.url,
            &self.api_key,
            &request,
            &self.retry,
            &self.breaker,
        )
        .await
        .map_err(KeepsakeError::Embedding)?;

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KeepsakeError::Embedding(format!("Invalid embeddings response: {e}")))?;

        if body.data.len() != texts.len() {
            return Err(KeepsakeError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "remote"
    }
}
