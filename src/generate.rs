//! Generation (completion) client for grounded answer synthesis.
//!
//! Mirrors the embedding client: a narrow [`Generator`] trait with an
//! OpenAI-compatible `POST /v1/chat/completions` backend, the same retry
//! and backoff rules, and the same refusal to truncate oversized input —
//! a prompt above `max_prompt_chars` fails with
//! [`ModelError::ContentTooLarge`]; trimming context to fit is the prompt
//! assembler's job, not this client's.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::ModelError;

const SERVICE: &str = "generation";

/// Per-request generation knobs, taken from config and passed through
/// unchanged to the completion endpoint.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerateOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// A client for an external text-generation service.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Identifier of the generation model (e.g. `"gpt-4o-mini"`).
    fn model_id(&self) -> &str;

    /// Produce a completion for `prompt`.
    async fn generate(&self, prompt: &str, options: &GenerateOptions)
        -> Result<String, ModelError>;
}

/// Placeholder used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_id(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<String, ModelError> {
        Err(ModelError::InvalidInput {
            service: SERVICE.to_string(),
            message: "generation provider is disabled; set [generation] provider in config"
                .to_string(),
        })
    }
}

/// Generation client for any OpenAI-compatible chat-completions endpoint.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_prompt_chars: usize,
    max_retries: u32,
    backoff: Duration,
}

impl HttpGenerator {
    pub fn from_config(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for openai provider"))?;
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
            max_prompt_chars: config.max_prompt_chars,
            max_retries: config.max_retries,
            backoff: Duration::from_secs(1),
        })
    }

    /// Override the backoff base delay (used by tests to avoid real waits).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, ModelError> {
        if prompt.len() > self.max_prompt_chars {
            return Err(ModelError::ContentTooLarge {
                service: SERVICE.to_string(),
                size: prompt.len(),
                limit: self.max_prompt_chars,
            });
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [ { "role": "user", "content": prompt } ],
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
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
                        return parse_completion(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = ModelError::from_status(SERVICE, status, body_text);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::warn!(attempt, error = %err, "generation request failed, retrying");
                    last_err = Some(err);
                }
                Err(e) => {
                    let err = ModelError::Transport {
                        service: SERVICE.to_string(),
                        source: e,
                    };
                    tracing::warn!(attempt, error = %err, "generation request failed, retrying");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ModelError::Unexpected {
            service: SERVICE.to_string(),
            message: "generation failed with no attempts made".to_string(),
        }))
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String, ModelError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| ModelError::Unexpected {
            service: SERVICE.to_string(),
            message: "missing choices[0].message.content in completion response".to_string(),
        })
}

/// Create the generator named by the configuration.
pub fn create_generator(
    config: &GenerationConfig,
) -> anyhow::Result<std::sync::Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(std::sync::Arc::new(DisabledGenerator)),
        "openai" => Ok(std::sync::Arc::new(HttpGenerator::from_config(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_generator(server: &MockServer, max_retries: u32) -> HttpGenerator {
        HttpGenerator {
            client: reqwest::Client::new(),
            base_url: server.base_url(),
            api_key: "test-key".to_string(),
            model: "test-chat".to_string(),
            max_prompt_chars: 500,
            max_retries,
            backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_generate_returns_completion_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(serde_json::json!({
                    "choices": [ { "message": { "content": "Paris." } } ]
                }));
            })
            .await;

        let generator = test_generator(&server, 0);
        let answer = generator
            .generate("What is the capital of France?", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(answer, "Paris.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_retried_then_surfaced() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("slow down");
            })
            .await;

        let generator = test_generator(&server, 1);
        let err = generator
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::RateLimited { .. }));
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_oversized_prompt_fails_without_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200);
            })
            .await;

        let generator = test_generator(&server, 0);
        let prompt = "p".repeat(1000);
        let err = generator
            .generate(&prompt, &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::ContentTooLarge { .. }));
        mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_malformed_response_is_unexpected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(serde_json::json!({ "choices": [] }));
            })
            .await;

        let generator = test_generator(&server, 0);
        let err = generator
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Unexpected { .. }));
    }
}
