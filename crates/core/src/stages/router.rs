//! Question router: one cheap classification call, then a pure decision
//! table that fixes the pipeline plan for the whole request.
//!
//! The classification call never propagates an error; any failure yields the
//! safe default (general / medium / medium, research on), which routes to the
//! basic research pipeline.

use crate::ir::extract::parse_with_repair;
use crate::models::TokenUsage;
use crate::pipeline::config::{ConsultantRole, PipelineConfig, PipelineMode};
use crate::provider::{ChatModel, CompletionRequest};
use crate::stages::prompts;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

const ROUTER_TEMPERATURE: f32 = 0.1;
const ROUTER_MAX_TOKENS: u32 = 512;

/// Three-level scale used for both complexity and risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Level::Low),
            "medium" => Some(Level::Medium),
            "high" => Some(Level::High),
            _ => None,
        }
    }
}

/// Router output: what kind of question this is
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub domain: String,
    pub complexity: Level,
    pub risk_level: Level,
    pub needs_research: bool,
    pub needs_cross_check: bool,
    pub needs_x_search: bool,
    pub notes: String,
}

impl Classification {
    /// Used whenever classification fails for any reason.
    pub fn safe_default() -> Self {
        Self {
            domain: "general".to_string(),
            complexity: Level::Medium,
            risk_level: Level::Medium,
            needs_research: true,
            needs_cross_check: false,
            needs_x_search: false,
            notes: "default (classification not performed)".to_string(),
        }
    }

    /// Build from raw model JSON, clamping everything out-of-set.
    fn from_value(value: &Value) -> Self {
        let default = Self::safe_default();
        let level = |key: &str, fallback: Level| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(Level::parse_lenient)
                .unwrap_or(fallback)
        };
        let flag = |key: &str, fallback: bool| {
            value.get(key).and_then(|v| v.as_bool()).unwrap_or(fallback)
        };
        Self {
            domain: value
                .get("domain")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .unwrap_or(default.domain),
            complexity: level("complexity", Level::Medium),
            risk_level: level("risk_level", Level::Medium),
            needs_research: flag("needs_research", true),
            needs_cross_check: flag("needs_cross_check", false),
            needs_x_search: flag("needs_x_search", false),
            notes: value
                .get("notes")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Classify the question with one low-temperature JSON call.
pub async fn classify(
    model: &dyn ChatModel,
    question: &str,
    history_context: &str,
) -> (Classification, TokenUsage) {
    let request = CompletionRequest::new(
        prompts::ROUTER,
        prompts::router_prompt(question, history_context),
    )
    .with_temperature(ROUTER_TEMPERATURE)
    .with_max_output_tokens(ROUTER_MAX_TOKENS)
    .with_json_output();

    match model.complete(request).await {
        Ok(completion) => match parse_with_repair(&completion.text) {
            Some(value) => {
                let classification = Classification::from_value(&value);
                debug!(?classification, "question classified");
                (classification, completion.usage)
            }
            None => {
                warn!("router returned unparseable JSON, using safe default");
                (Classification::safe_default(), completion.usage)
            }
        },
        Err(e) => {
            warn!(error = %e, "router call failed, using safe default");
            (Classification::safe_default(), TokenUsage::default())
        }
    }
}

const HIGH_RISK_DOMAINS: [&str; 3] = ["medical", "legal", "finance"];

impl PipelineConfig {
    /// The decision table. Pure; evaluated in priority order.
    pub fn from_classification(c: &Classification) -> Self {
        let mut roles = BTreeSet::new();

        let mut config = if c.risk_level == Level::High
            || HIGH_RISK_DOMAINS.contains(&c.domain.as_str())
        {
            roles.extend([
                ConsultantRole::Contrarian,
                ConsultantRole::Structural,
                ConsultantRole::Checklist,
            ]);
            Self {
                mode: PipelineMode::FullVerify,
                enable_research: true,
                enable_meta: true,
                enable_strict_review: true,
                enable_secondary_review: true,
                roles,
                use_x_search: false,
                routing_reason: format!(
                    "high-risk question ({}, risk={:?}) -> full verification pipeline",
                    c.domain, c.risk_level
                ),
            }
        } else if c.complexity == Level::High || c.needs_cross_check {
            if c.complexity == Level::High {
                roles.insert(ConsultantRole::Structural);
            }
            Self {
                mode: PipelineMode::ResearchMeta,
                enable_research: true,
                enable_meta: true,
                enable_strict_review: false,
                enable_secondary_review: false,
                roles,
                use_x_search: false,
                routing_reason: format!(
                    "high complexity ({:?}) -> research + meta-question pipeline",
                    c.complexity
                ),
            }
        } else if c.complexity == Level::Medium || c.needs_research {
            Self {
                mode: PipelineMode::Research,
                enable_research: true,
                enable_meta: false,
                enable_strict_review: false,
                enable_secondary_review: false,
                roles,
                use_x_search: false,
                routing_reason: format!(
                    "medium complexity ({:?}) -> basic research pipeline",
                    c.complexity
                ),
            }
        } else {
            Self {
                mode: PipelineMode::Light,
                enable_research: false,
                enable_meta: false,
                enable_strict_review: false,
                enable_secondary_review: false,
                roles,
                use_x_search: false,
                routing_reason: format!(
                    "low complexity, low risk ({:?}/{:?}) -> lightweight mode",
                    c.complexity, c.risk_level
                ),
            }
        };

        // News and trend questions get X search, which runs on the contrarian
        if c.needs_x_search || c.domain == "news" {
            config.use_x_search = true;
            config.roles.insert(ConsultantRole::Contrarian);
            config.routing_reason.push_str(" + X search boost");
        }

        config
    }
}
