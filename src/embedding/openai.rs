//! OpenAI-compatible embedding provider implementation.
//!
//! This module provides an implementation of the `EmbeddingProvider` trait
//! that talks to any service exposing an OpenAI-style `/embeddings` endpoint.
//! Pointing the base URL at a self-hosted server lets the engine use the same
//! sentence-embedding model the index was built with.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default embedding model.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// OpenAI-compatible embedding provider.
#[derive(Debug, Clone)]
pub struct OpenAIEmbedding {
    /// HTTP client with auth headers and timeout applied
    client: Client,

    /// Full URL of the embeddings endpoint
    endpoint: String,

    /// Model identifier sent with every request
    model: String,

    /// Expected dimension of the embedding vectors
    embedding_dimension: usize,

    /// Whether to ask the service to shorten vectors to `embedding_dimension`
    request_dimensions: bool,

    /// Attempts per request, including the first
    max_retries: usize,
}

impl OpenAIEmbedding {
    /// Create a new provider.
    ///
    /// # Arguments
    /// * `api_key` - Bearer token; may be empty for unauthenticated local servers
    /// * `base_url` - API root, e.g. `https://api.openai.com/v1`
    /// * `model` - Model name
    /// * `dimension` - Vector length; when set it is also sent as `dimensions`
    /// * `timeout` - Per-request timeout
    /// * `max_retries` - Attempts per request (at least 1)
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` for an empty model name, an
    /// invalid API key, or if the HTTP client cannot be built
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimension: Option<usize>,
        timeout: Duration,
        max_retries: usize,
    ) -> EmbeddingResult<Self> {
        if model.trim().is_empty() {
            return Err(EmbeddingError::ConfigError("missing embedding model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        if !api_key.trim().is_empty() {
            let auth = format!("Bearer {}", api_key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth).map_err(|e| EmbeddingError::ConfigError(format!("invalid API key: {}", e)))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        let embedding_dimension = dimension.unwrap_or_else(|| default_dimension(model));

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            embedding_dimension,
            request_dimensions: dimension.is_some(),
            max_retries: max_retries.max(1),
        })
    }

    /// Full URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, inputs: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.request_dimensions.then_some(self.embedding_dimension),
        };

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.client.post(&self.endpoint).json(&body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = response
                            .json()
                            .await
                            .map_err(|e| EmbeddingError::ApiError(format!("failed to parse response: {}", e)))?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        if parsed.data.len() != inputs.len() {
                            return Err(EmbeddingError::ApiError(format!(
                                "service returned {} embeddings for {} inputs",
                                parsed.data.len(),
                                inputs.len()
                            )));
                        }
                        debug!("Embedded {} texts with {}", inputs.len(), self.model);
                        return Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect());
                    }

                    let text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt < self.max_retries {
                        warn!("Embedding request failed ({}), retrying (attempt {})", status, attempt);
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::ApiError(format!("request failed ({}): {}", status, text)));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt < self.max_retries {
                        warn!("Embedding request error ({}), retrying (attempt {})", err, attempt);
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::ApiError(err.to_string()));
                }
            }
        }
    }
}

/// Known output sizes of hosted models.
fn default_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }
        self.request(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
