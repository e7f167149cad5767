//! # Provider Boundary
//!
//! The narrow seam between the pipeline and the LLM providers. Every stage
//! talks to a [`ChatModel`], never to a concrete HTTP client, so tests can
//! inject scripted models and failures without any network.
//!
//! Concrete implementations:
//! - [`GeminiClient`] - native Gemini API (search grounding + JSON output mode)
//! - [`OpenAiCompatClient`] - OpenAI-compatible chat API (OpenAI, Grok, OpenRouter)

pub mod gemini;
pub mod openai_compat;

use crate::models::{LlmProvider, ModelConfig, TokenUsage};
use async_trait::async_trait;
use std::sync::Arc;

pub use gemini::GeminiClient;
pub use openai_compat::OpenAiCompatClient;

/// One request to a chat model
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System instructions (role descriptor, output contract)
    pub system: String,
    /// User-visible prompt body
    pub prompt: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Output token cap
    pub max_output_tokens: u32,
    /// Request strict JSON output where the provider supports it
    pub json_output: bool,
    /// Enable search grounding (web, and X for providers that carry it)
    pub use_search: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_output_tokens: 4096,
            json_output: false,
            use_search: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn with_search(mut self) -> Self {
        self.use_search = true;
        self
    }
}

/// One response from a chat model
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Cited source identifiers (URLs or titles) when search grounding ran
    pub citations: Vec<String>,
    /// Search queries the provider issued while grounding
    pub search_queries: Vec<String>,
    /// Token usage reported by the provider
    pub usage: TokenUsage,
    /// The output was cut short by the token cap
    pub truncated: bool,
}

/// Errors from provider calls
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Authentication failed for provider {provider}")]
    Auth { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Quota exhausted: {message}")]
    QuotaExhausted { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("API request failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Response parse error: {message}")]
    Parse { message: String },

    #[error("Provider returned an empty response")]
    Empty,
}

impl ModelError {
    /// Transient errors worth retrying with backoff.
    ///
    /// Rate-limit and quota errors are the retry class the synthesis stage
    /// cares about; transport failures are retryable too. Auth and parse
    /// errors are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::RateLimited { .. }
                | ModelError::QuotaExhausted { .. }
                | ModelError::Timeout { .. }
                | ModelError::Connection { .. }
        )
    }

    /// Server-suggested delay, when the provider sent one
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ModelError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// The provider boundary trait
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// concurrently; the consultant pool runs up to three calls at once.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Execute one completion call
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ModelError>;

    /// Model identifier used in logs and IR metadata
    fn model_id(&self) -> String;
}

/// Shared handle to a chat model
pub type SharedModel = Arc<dyn ChatModel>;

/// Create a client for the configured provider
///
/// Reads the API key from the provider's environment variable. Returns
/// `ModelError::Auth` when the key is missing.
pub fn create_client(config: &ModelConfig) -> Result<SharedModel, ModelError> {
    let api_key =
        std::env::var(config.provider.api_key_env()).map_err(|_| ModelError::Auth {
            provider: format!(
                "{} (env var '{}' not set)",
                config.provider.display_name(),
                config.provider.api_key_env()
            ),
        })?;

    match config.provider {
        LlmProvider::Gemini => Ok(Arc::new(GeminiClient::new(&config.model, api_key)?)),
        // Everything else speaks the OpenAI-compatible chat API on its own host
        _ => Ok(Arc::new(OpenAiCompatClient::new(
            &config.provider,
            &config.model,
            api_key,
            config.base_url.clone(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(ModelError::RateLimited {
            retry_after_secs: 2
        }
        .is_retryable());
        assert!(ModelError::QuotaExhausted {
            message: "daily cap".to_string()
        }
        .is_retryable());
        assert!(ModelError::Connection {
            message: "reset".to_string()
        }
        .is_retryable());
        assert!(!ModelError::Auth {
            provider: "Gemini".to_string()
        }
        .is_retryable());
        assert!(!ModelError::Parse {
            message: "bad json".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_retry_after_passthrough() {
        let err = ModelError::RateLimited {
            retry_after_secs: 7,
        };
        assert_eq!(err.retry_after(), Some(7));
        assert_eq!(ModelError::Empty.retry_after(), None);
    }

    #[test]
    fn test_request_builder() {
        let req = CompletionRequest::new("sys", "prompt")
            .with_temperature(0.1)
            .with_json_output()
            .with_search();
        assert!(req.json_output);
        assert!(req.use_search);
        assert_eq!(req.temperature, 0.1);
    }
}
