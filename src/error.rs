//! Error taxonomy for external model-service calls.
//!
//! Both the embedding and generation clients classify failures into
//! [`ModelError`] variants so that callers (and the retry loops inside the
//! clients themselves) can distinguish transient conditions from permanent
//! ones:
//!
//! | Variant | Retryable | Typical cause |
//! |---------|-----------|---------------|
//! | `RateLimited` | yes | HTTP 429 |
//! | `ServiceUnavailable` | yes | HTTP 5xx, connection refused |
//! | `Transport` | yes | network error, timeout |
//! | `InvalidInput` | no | HTTP 4xx (not 429/413), malformed request |
//! | `ContentTooLarge` | no | input exceeds the configured model limit |
//! | `Unexpected` | no | response the client cannot interpret |
//!
//! Configuration problems (metric/model mismatches, missing settings) are not
//! part of this taxonomy — they fail fast during `load_config` or collection
//! setup, before any request is issued.

use thiserror::Error;

/// A caller-supplied argument that can never succeed (blank query, zero
/// `top_k`). Carried inside `anyhow` chains so the HTTP layer can map it
/// to a 400 by downcast instead of by message text.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidRequest(pub String);

impl InvalidRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure classification for embedding and generation service calls.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The service rejected the request with a rate limit (HTTP 429).
    #[error("{service} rate limited: {message}")]
    RateLimited { service: String, message: String },

    /// The service is temporarily unavailable (HTTP 5xx).
    #[error("{service} unavailable: {message}")]
    ServiceUnavailable { service: String, message: String },

    /// The request could not reach the service or timed out.
    #[error("{service} request failed: {source}")]
    Transport {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service rejected the input; retrying the same request cannot help.
    #[error("invalid input for {service}: {message}")]
    InvalidInput { service: String, message: String },

    /// Input exceeds the model's configured size limit. The caller must
    /// shrink the input; this layer never truncates silently.
    #[error("content too large for {service}: {size} chars exceeds limit of {limit}")]
    ContentTooLarge {
        service: String,
        size: usize,
        limit: usize,
    },

    /// The service returned a response this client cannot interpret.
    #[error("unexpected response from {service}: {message}")]
    Unexpected { service: String, message: String },
}

impl ModelError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::RateLimited { .. }
                | ModelError::ServiceUnavailable { .. }
                | ModelError::Transport { .. }
        )
    }

    /// Classify an HTTP error status into the taxonomy.
    ///
    /// `429` → `RateLimited`, `5xx` → `ServiceUnavailable`, `413` →
    /// `ContentTooLarge` (sizes unknown at this point, reported as 0),
    /// any other `4xx` → `InvalidInput`.
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 {
            ModelError::RateLimited {
                service: service.to_string(),
                message: body,
            }
        } else if status.is_server_error() {
            ModelError::ServiceUnavailable {
                service: service.to_string(),
                message: format!("{}: {}", status, body),
            }
        } else if status.as_u16() == 413 {
            ModelError::ContentTooLarge {
                service: service.to_string(),
                size: 0,
                limit: 0,
            }
        } else {
            ModelError::InvalidInput {
                service: service.to_string(),
                message: format!("{}: {}", status, body),
            }
        }
    }
}
