//! Structured intermediate representation of research findings.
//!
//! Every enum here is closed: parsing an unrecognized or missing value
//! coerces to the `Unknown` member instead of surfacing a rogue string.
//! The normalizer in [`super::normalize`] enforces that rule and records a
//! warning per coerced field.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where a fact came from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    Web,
    Video,
    /// Stated by a model without an external source
    #[default]
    Model,
}

impl FactSource {
    /// Lenient parse; unrecognized values fall back to `Model`.
    /// Accepts `youtube` as a legacy alias for `Video`.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "web" => Some(FactSource::Web),
            "video" | "youtube" => Some(FactSource::Video),
            "model" => Some(FactSource::Model),
            _ => None,
        }
    }
}

/// Confidence in a fact
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl Confidence {
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            "unknown" => Some(Confidence::Unknown),
            _ => None,
        }
    }

    /// Marker used when rendering facts into prompts
    pub fn mark(&self) -> &'static str {
        match self {
            Confidence::High => "[confirmed]",
            Confidence::Medium => "[likely]",
            Confidence::Low => "[reported]",
            Confidence::Unknown => "[unverified]",
        }
    }
}

/// Severity of a risk
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl Severity {
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "unknown" => Some(Severity::Unknown),
            _ => None,
        }
    }
}

/// Timeframe over which a risk materializes
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Short,
    Medium,
    Long,
    #[default]
    Unknown,
}

impl Timeframe {
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "short" => Some(Timeframe::Short),
            "medium" => Some(Timeframe::Medium),
            "long" => Some(Timeframe::Long),
            "unknown" => Some(Timeframe::Unknown),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Short => "short-term",
            Timeframe::Medium => "medium-term",
            Timeframe::Long => "long-term",
            Timeframe::Unknown => "timeframe unclear",
        }
    }
}

/// Why a point could not be resolved during research
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum WhyUnknown {
    InsufficientData,
    ConflictingData,
    GreyArea,
    FutureDependent,
    #[default]
    Unknown,
}

impl WhyUnknown {
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "insufficient_data" => Some(WhyUnknown::InsufficientData),
            "conflicting_data" => Some(WhyUnknown::ConflictingData),
            "grey_area" => Some(WhyUnknown::GreyArea),
            "future_dependent" => Some(WhyUnknown::FutureDependent),
            "unknown" => Some(WhyUnknown::Unknown),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WhyUnknown::InsufficientData => "insufficient data",
            WhyUnknown::ConflictingData => "sources conflict",
            WhyUnknown::GreyArea => "grey area",
            WhyUnknown::FutureDependent => "depends on future events",
            WhyUnknown::Unknown => "reason unclear",
        }
    }
}

/// Impact of an unresolved point on the answer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl Impact {
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Impact::High),
            "medium" => Some(Impact::Medium),
            "low" => Some(Impact::Low),
            "unknown" => Some(Impact::Unknown),
            _ => None,
        }
    }
}

/// A single fact extracted from research
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Fact {
    /// The fact itself
    pub statement: String,
    /// Source type
    #[serde(default)]
    pub source: FactSource,
    /// Specific URL or model name
    #[serde(default)]
    pub source_detail: String,
    /// Information date (YYYY-MM-DD) if known
    #[serde(default)]
    pub date: Option<String>,
    /// Confidence level
    #[serde(default)]
    pub confidence: Confidence,
}

/// An option or alternative approach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptionIr {
    /// Option name (e.g., "Plan A: stay the course")
    pub name: String,
    /// Advantages
    #[serde(default)]
    pub pros: Vec<String>,
    /// Disadvantages
    #[serde(default)]
    pub cons: Vec<String>,
    /// Conditions for this option to work
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Cost estimate if one surfaced
    #[serde(default)]
    pub estimated_cost: Option<String>,
}

/// A risk identified during research
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Risk {
    /// Risk description
    pub statement: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub timeframe: Timeframe,
    /// Mitigation strategy if one surfaced
    #[serde(default)]
    pub mitigation: Option<String>,
}

/// An unresolved point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UnknownPoint {
    /// The open question
    pub question: String,
    #[serde(default)]
    pub why_unknown: WhyUnknown,
    #[serde(default)]
    pub impact: Impact,
}

/// Metadata about the research pass that produced the IR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResearchMetadata {
    /// Original user question
    #[serde(default)]
    pub question: String,
    /// Language of the question ("en", "ja", ...)
    #[serde(default = "default_language")]
    pub language: String,
    /// When the IR was created
    pub created_at: DateTime<Utc>,
    /// Models consulted during research
    #[serde(default)]
    pub models: Vec<String>,
    /// Number of sources consulted
    #[serde(default)]
    pub sources_count: usize,
    /// Search queries that were issued
    #[serde(default)]
    pub search_queries: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for ResearchMetadata {
    fn default() -> Self {
        Self {
            question: String::new(),
            language: default_language(),
            created_at: Utc::now(),
            models: Vec::new(),
            sources_count: 0,
            search_queries: Vec::new(),
        }
    }
}

/// Top-level research intermediate representation
///
/// Produced by the extractor, consumed by every downstream stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResearchIr {
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub options: Vec<OptionIr>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub unknowns: Vec<UnknownPoint>,
    #[serde(default)]
    pub metadata: ResearchMetadata,
}

impl ResearchIr {
    /// High-confidence facts first, for facts-priority synthesis
    pub fn facts_by_confidence(&self) -> Vec<&Fact> {
        let mut facts: Vec<&Fact> = self.facts.iter().collect();
        facts.sort_by_key(|f| f.confidence);
        facts
    }

    /// Risks sorted most severe first
    pub fn risks_by_severity(&self) -> Vec<&Risk> {
        let mut risks: Vec<&Risk> = self.risks.iter().collect();
        risks.sort_by_key(|r| r.severity);
        risks
    }
}
