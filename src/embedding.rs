//! Embedding client abstraction and the OpenAI-compatible HTTP backend.
//!
//! The [`Embedder`] trait is the seam between the pipeline and the external
//! embedding service: the ingestion pipeline and the retriever both receive
//! an `Arc<dyn Embedder>` rather than reaching for a global client.
//!
//! # Retry strategy
//!
//! [`HttpEmbedder`] retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - network errors and timeouts → retry
//! - HTTP 4xx (not 429) → fail immediately
//! - backoff: 1×, 2×, 4×, ... the base delay, capped at 32×
//!
//! Total attempts are capped by `max_retries + 1` so retries never amplify
//! load unboundedly. Every request carries the configured timeout.
//!
//! Oversized inputs fail with [`ModelError::ContentTooLarge`] before any
//! request is sent — this layer never truncates text silently.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::ModelError;

const SERVICE: &str = "embeddings";

/// A client for an external embedding service.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the embedding model (e.g. `"text-embedding-3-small"`).
    fn model_id(&self) -> &str;

    /// Vector dimensionality produced by the model.
    fn dims(&self) -> usize;

    /// Embed a batch of texts. The result is order-preserving and
    /// one-to-one with the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;

    /// Embed a single text (e.g. a search query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let batch = [text.to_string()];
        let mut vectors = self.embed_batch(&batch).await?;
        vectors.pop().ok_or_else(|| ModelError::Unexpected {
            service: SERVICE.to_string(),
            message: "empty embedding response".to_string(),
        })
    }
}

/// Placeholder used when `embedding.provider = "disabled"`. Every call fails
/// with a descriptive error.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_id(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        Err(ModelError::InvalidInput {
            service: SERVICE.to_string(),
            message: "embedding provider is disabled; set [embedding] provider in config"
                .to_string(),
        })
    }
}

/// Embedding client for any OpenAI-compatible `POST /v1/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_input_chars: usize,
    max_retries: u32,
    backoff: Duration,
}

impl HttpEmbedder {
    /// Build a client from configuration. Reads the API key from the
    /// environment variable named by `api_key_env`.
    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for openai provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for openai provider"))?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
            max_input_chars: config.max_input_chars,
            max_retries: config.max_retries,
            backoff: Duration::from_secs(1),
        })
    }

    /// Override the backoff base delay (used by tests to avoid real waits).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/v1/embeddings", self.base_url);

        let mut last_err: Option<ModelError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff * (1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value =
                            response.json().await.map_err(|e| ModelError::Transport {
                                service: SERVICE.to_string(),
                                source: e,
                            })?;
                        return self.parse_response(&json, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = ModelError::from_status(SERVICE, status, body_text);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::warn!(attempt, error = %err, "embedding request failed, retrying");
                    last_err = Some(err);
                }
                Err(e) => {
                    let err = ModelError::Transport {
                        service: SERVICE.to_string(),
                        source: e,
                    };
                    tracing::warn!(attempt, error = %err, "embedding request failed, retrying");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ModelError::Unexpected {
            service: SERVICE.to_string(),
            message: "embedding failed with no attempts made".to_string(),
        }))
    }

    fn parse_response(
        &self,
        json: &serde_json::Value,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, ModelError> {
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| ModelError::Unexpected {
                service: SERVICE.to_string(),
                message: "missing data array in embedding response".to_string(),
            })?;

        // The API may return items out of order; restore input order by index.
        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for (pos, item) in data.iter().enumerate() {
            let index = item
                .get("index")
                .and_then(|i| i.as_u64())
                .map(|i| i as usize)
                .unwrap_or(pos);
            let vector: Vec<f32> = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| ModelError::Unexpected {
                    service: SERVICE.to_string(),
                    message: "missing embedding array in response item".to_string(),
                })?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();

            if vector.len() != self.dims {
                return Err(ModelError::Unexpected {
                    service: SERVICE.to_string(),
                    message: format!(
                        "model returned {} dims, collection expects {}",
                        vector.len(),
                        self.dims
                    ),
                });
            }
            indexed.push((index, vector));
        }

        if indexed.len() != expected {
            return Err(ModelError::Unexpected {
                service: SERVICE.to_string(),
                message: format!(
                    "expected {} embeddings, got {}",
                    expected,
                    indexed.len()
                ),
            });
        }

        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            if text.len() > self.max_input_chars {
                return Err(ModelError::ContentTooLarge {
                    service: SERVICE.to_string(),
                    size: text.len(),
                    limit: self.max_input_chars,
                });
            }
        }
        self.request(texts).await
    }
}

/// Create the embedder named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<std::sync::Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(std::sync::Arc::new(DisabledEmbedder)),
        "openai" => Ok(std::sync::Arc::new(HttpEmbedder::from_config(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_embedder(server: &MockServer, dims: usize, max_retries: u32) -> HttpEmbedder {
        HttpEmbedder {
            client: reqwest::Client::new(),
            base_url: server.base_url(),
            api_key: "test-key".to_string(),
            model: "test-embed".to_string(),
            dims,
            max_input_chars: 1000,
            max_retries,
            backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_input_order() {
        let server = MockServer::start_async().await;
        // Items returned out of order; the client must sort by index.
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(serde_json::json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] },
                    ]
                }));
            })
            .await;

        let embedder = test_embedder(&server, 2, 0);
        let vectors = embedder
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_retried_up_to_cap() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(503).body("down for maintenance");
            })
            .await;

        let embedder = test_embedder(&server, 2, 2);
        let err = embedder.embed_batch(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, ModelError::ServiceUnavailable { .. }));
        // 1 initial attempt + 2 retries.
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(400).body("bad input");
            })
            .await;

        let embedder = test_embedder(&server, 2, 3);
        let err = embedder.embed_batch(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidInput { .. }));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_oversized_input_fails_without_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200);
            })
            .await;

        let embedder = test_embedder(&server, 2, 0);
        let big = "x".repeat(2000);
        let err = embedder.embed_batch(&[big]).await.unwrap_err();
        assert!(matches!(err, ModelError::ContentTooLarge { .. }));
        mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_dims_mismatch_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(serde_json::json!({
                    "data": [ { "index": 0, "embedding": [1.0, 2.0, 3.0] } ]
                }));
            })
            .await;

        let embedder = test_embedder(&server, 2, 0);
        let err = embedder.embed_batch(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, ModelError::Unexpected { .. }));
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let server = MockServer::start_async().await;
        let embedder = test_embedder(&server, 2, 0);
        let vectors = embedder.embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_embedder_errors() {
        let err = DisabledEmbedder
            .embed_batch(&["hi".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidInput { .. }));
    }
}
