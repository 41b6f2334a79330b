//! HTTP-based embedding provider, the one default [`Embedder`] adapter
//! (spec §4.4). Shaped directly on `VoyageEmbeddings`: a model name, a
//! batch size capping request fan-out, truncation-on-overflow, and an
//! exponential retry policy wrapping each request.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::embedder::{EmbedError, Embedder, Role};
use crate::retry::{with_retry, RetryPolicy};

const DEFAULT_DIMENSIONS: usize = 1024;
const DEFAULT_BATCH_SIZE: usize = 128;
const MAX_BATCH_SIZE: usize = 1000;

/// Talks to a generic embeddings endpoint (`POST {base_url}/embeddings`,
/// OpenAI/Voyage-shaped request/response bodies).
pub struct HttpEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
    dimensions: usize,
    batch_size: usize,
    retry_policy: RetryPolicy,
}

impl HttpEmbedder {
    /// Builds a provider from an API key, endpoint base and model name.
    /// Defaults: 1024 dimensions, batch size 128, exponential retry(3).
    #[must_use]
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            client: Client::new(),
            dimensions: DEFAULT_DIMENSIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            retry_policy: RetryPolicy::exponential(3),
        }
    }

    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.min(MAX_BATCH_SIZE);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    async fn request(&self, texts: &[String], role: Role) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = EmbedRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
            input_type: match role {
                Role::Document => "document",
                Role::Query => "query",
            },
            dimensions: self.dimensions,
        };

        let response = with_retry(&self.retry_policy, || async {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| EmbedError::Transport(e.to_string()))?
                .error_for_status()
                .map_err(|e| EmbedError::Transport(e.to_string()))
        })
        .await?;

        let parsed: EmbedResponse =
            response.json().await.map_err(|e| EmbedError::Transport(format!("malformed response body: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbedError::CountMismatch { expected: texts.len(), got: parsed.data.len() });
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str, role: Role) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.request(std::slice::from_ref(&text.to_string()), role).await?;
        vectors.pop().ok_or_else(|| EmbedError::CountMismatch { expected: 1, got: 0 })
    }

    async fn embed_batch(&self, texts: &[String], role: Role) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.request(chunk, role).await?;
            tracing::debug!(chunk_size = chunk.len(), "embedded chunk");
            out.extend(embeddings);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    input: Vec<String>,
    model: String,
    input_type: &'static str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_collection_dimensionality() {
        let embedder = HttpEmbedder::new("key", "https://api.example.com", "embed-1");
        assert_eq!(embedder.dimensions(), 1024);
        assert_eq!(embedder.batch_size, 128);
    }

    #[test]
    fn batch_size_is_capped_at_provider_max() {
        let embedder = HttpEmbedder::new("key", "https://api.example.com", "embed-1").with_batch_size(5000);
        assert_eq!(embedder.batch_size, 1000);
    }

    #[tokio::test]
    async fn embed_batch_of_empty_input_short_circuits() {
        let embedder = HttpEmbedder::new("key", "https://api.example.com", "embed-1");
        let result = embedder.embed_batch(&[], Role::Document).await.unwrap();
        assert!(result.is_empty());
    }
}
