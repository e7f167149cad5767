//! OpenAI-compatible chat completions client.
//!
//! Serves the consultant and review providers: OpenAI itself, Grok (xAI),
//! Anthropic's compatible endpoint, and OpenRouter as a gateway to
//! everything else. One client covers them all because they share the
//! `/chat/completions` wire shape.

use super::{ChatModel, Completion, CompletionRequest, ModelError};
use crate::models::{LlmProvider, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT_SECS: u64 = 120;

fn default_base_url(provider: &LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Grok => "https://api.x.ai/v1",
        LlmProvider::OpenRouter => "https://openrouter.ai/api/v1",
        LlmProvider::Anthropic => "https://api.anthropic.com/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Client for OpenAI-compatible chat APIs
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    provider_name: String,
    /// Grok exposes X/Twitter search through live search parameters
    supports_live_search: bool,
}

impl OpenAiCompatClient {
    pub fn new(
        provider: &LlmProvider,
        model: &str,
        api_key: String,
        base_url: Option<String>,
    ) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ModelError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| default_base_url(provider).to_string()),
            api_key,
            model: model.to_string(),
            provider_name: provider.display_name().to_string(),
            supports_live_search: matches!(provider, LlmProvider::Grok),
        })
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::new();
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });

        if request.json_output {
            body["response_format"] = json!({"type": "json_object"});
        }
        if request.use_search && self.supports_live_search {
            body["search_parameters"] = json!({
                "mode": "auto",
                "sources": [{"type": "web"}, {"type": "x"}],
                "return_citations": true,
            });
        }

        body
    }

    fn parse_response(&self, body: &Value) -> Result<Completion, ModelError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or(ModelError::Empty)?;

        let text = choice
            .pointer("/message/content")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        if text.is_empty() {
            return Err(ModelError::Empty);
        }

        let truncated = choice
            .get("finish_reason")
            .and_then(|r| r.as_str())
            .is_some_and(|r| r == "length");

        let citations = body
            .get("citations")
            .and_then(|c| c.as_array())
            .map(|urls| {
                urls.iter()
                    .filter_map(|u| u.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let usage = TokenUsage {
            input_tokens: body
                .pointer("/usage/prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            output_tokens: body
                .pointer("/usage/completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        };

        Ok(Completion {
            text,
            citations,
            usage,
            truncated,
            ..Default::default()
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        debug!(provider = %self.provider_name, model = %self.model, "chat request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout {
                        timeout_secs: REQUEST_TIMEOUT_SECS,
                    }
                } else {
                    ModelError::Connection {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ModelError::RateLimited { retry_after_secs });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ModelError::Auth {
                provider: self.provider_name.clone(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if message.contains("insufficient_quota") {
                return Err(ModelError::QuotaExhausted { message });
            }
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await.map_err(|e| ModelError::Parse {
            message: e.to_string(),
        })?;

        self.parse_response(&body)
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}
