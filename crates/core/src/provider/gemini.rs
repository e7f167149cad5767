//! Google Gemini API client.
//!
//! The primary research provider. Key differences from the OpenAI-compatible
//! API:
//! - Auth via `?key=API_KEY` query parameter
//! - System instructions are a top-level `systemInstruction` field
//! - Search grounding via the `google_search` tool; cited sources arrive in
//!   `groundingMetadata.groundingChunks`
//! - Strict JSON mode via `generationConfig.responseMimeType`

use super::{ChatModel, Completion, CompletionRequest, ModelError};
use crate::models::TokenUsage;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Native Gemini API client
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(model: &str, api_key: String) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ModelError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Override the API base URL (used by tests against a local server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut generation_config = json!({
            "temperature": request.temperature,
            "maxOutputTokens": request.max_output_tokens,
        });
        if request.json_output {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": request.prompt}],
            }],
            "generationConfig": generation_config,
        });

        if !request.system.is_empty() {
            body["systemInstruction"] = json!({
                "parts": [{"text": request.system}],
            });
        }
        if request.use_search {
            body["tools"] = json!([{"google_search": {}}]);
        }

        body
    }

    fn parse_response(&self, body: &Value) -> Result<Completion, ModelError> {
        let candidate = body
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or(ModelError::Empty)?;

        let text: String = candidate
            .pointer("/content/parts")
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ModelError::Empty);
        }

        let truncated = candidate
            .get("finishReason")
            .and_then(|r| r.as_str())
            .is_some_and(|r| r == "MAX_TOKENS");

        let citations = candidate
            .pointer("/groundingMetadata/groundingChunks")
            .and_then(|c| c.as_array())
            .map(|chunks| {
                chunks
                    .iter()
                    .filter_map(|c| c.pointer("/web/uri").and_then(|u| u.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let search_queries = candidate
            .pointer("/groundingMetadata/webSearchQueries")
            .and_then(|q| q.as_array())
            .map(|queries| {
                queries
                    .iter()
                    .filter_map(|q| q.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let usage = TokenUsage {
            input_tokens: body
                .pointer("/usageMetadata/promptTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            output_tokens: body
                .pointer("/usageMetadata/candidatesTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        };

        Ok(Completion {
            text,
            citations,
            search_queries,
            usage,
            truncated,
        })
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ModelError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = self.build_body(&request);

        debug!(model = %self.model, search = request.use_search, "gemini request");

        let response = self
            .client
            .post(&url)
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
                provider: "Gemini".to_string(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            // Vertex reports daily quota exhaustion as RESOURCE_EXHAUSTED
            if message.contains("RESOURCE_EXHAUSTED") {
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
