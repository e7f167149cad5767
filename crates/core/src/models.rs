//! # Prism Models
//!
//! Centralized LLM configuration types for the Prism pipeline.
//! Every stage (router, research, extractor, consultants, synthesis, review)
//! resolves its model through these types, so provider selection lives in one
//! place instead of being scattered across call sites.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported LLM providers
///
/// - Gemini (Google) - `GEMINI_API_KEY` - primary research/synthesis provider
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - Grok (xAI) - `XAI_API_KEY` - carries the X/Twitter search lens
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Gemini,
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
    Grok,
    OpenRouter,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::Gemini,
            LlmProvider::OpenAI,
            LlmProvider::Anthropic,
            LlmProvider::Grok,
            LlmProvider::OpenRouter,
        ]
    }

    /// Display name for status output
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::Grok => "Grok",
            LlmProvider::OpenRouter => "OpenRouter",
        }
    }

    /// Environment variable holding the API key for this provider
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Whether this provider speaks the OpenAI-compatible chat API.
    /// Anthropic counts: it exposes a compatible endpoint at its own host.
    pub fn is_openai_compatible(&self) -> bool {
        !matches!(self, LlmProvider::Gemini)
    }

    /// Default model for this provider
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini-2.5-pro",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::Grok => "grok-3",
            LlmProvider::OpenRouter => "anthropic/claude-3.5-sonnet",
        }
    }
}

/// Configuration for LLM model selection
///
/// Used throughout the pipeline to configure which provider and model a stage
/// talks to. Supports per-stage overrides via [`StageModels`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "gemini-2.5-pro", "gpt-4o")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini,
            model: LlmProvider::Gemini.default_model().to_string(),
            base_url: None,
        }
    }
}

impl ModelConfig {
    /// Create a new model config with the default provider (Gemini)
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Gemini,
            model: model.into(),
            base_url: None,
        }
    }

    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Per-stage model resolution
///
/// Resolution order: per-stage override -> global model -> provider default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageModels {
    /// Global provider for all stages
    #[serde(default)]
    pub global_provider: LlmProvider,
    /// Global model for all stages
    pub global_model: Option<String>,
    /// Base URL override (OpenAI-compatible endpoints only)
    pub base_url: Option<String>,
    /// Per-stage model overrides (stage id -> model name)
    #[serde(default)]
    pub per_stage_models: HashMap<String, String>,
    /// Per-stage provider overrides (stage id -> provider)
    #[serde(default)]
    pub per_stage_providers: HashMap<String, LlmProvider>,
}

impl StageModels {
    /// Resolve the model config for a pipeline stage
    pub fn resolve(&self, stage_id: &str) -> ModelConfig {
        let provider = self
            .per_stage_providers
            .get(stage_id)
            .cloned()
            .unwrap_or_else(|| self.global_provider.clone());

        let model = self
            .per_stage_models
            .get(stage_id)
            .or(self.global_model.as_ref())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = if provider.is_openai_compatible() {
            self.base_url.clone()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }
}

/// Token usage for one provider call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Accumulate usage from another call
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}
