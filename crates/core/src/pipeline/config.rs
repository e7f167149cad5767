//! Pipeline configuration, fixed once per request by the router.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Pipeline execution mode, most thorough first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Research + meta-questions + all consultants + strict and secondary review
    FullVerify,
    /// Research + meta-questions, no review stages
    ResearchMeta,
    /// Research only
    Research,
    /// Single direct answer, no external stages
    Light,
}

impl PipelineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::FullVerify => "full_verify",
            PipelineMode::ResearchMeta => "research_meta",
            PipelineMode::Research => "research",
            PipelineMode::Light => "light",
        }
    }
}

/// Analytical lens assigned to a consultant task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultantRole {
    /// Contrarian / edge-case hunter (runs with X search when enabled)
    Contrarian,
    /// Structural / long-horizon risk analysis
    Structural,
    /// Test-case / checklist reasoning
    Checklist,
}

impl ConsultantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultantRole::Contrarian => "contrarian",
            ConsultantRole::Structural => "structural",
            ConsultantRole::Checklist => "checklist",
        }
    }
}

/// Immutable per-request stage plan.
///
/// Built once by the router's decision table; later stages consult only
/// this, never the original question, to decide whether to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    pub enable_research: bool,
    pub enable_meta: bool,
    pub enable_strict_review: bool,
    pub enable_secondary_review: bool,
    /// Consultant roles to fan out (at most 3)
    pub roles: BTreeSet<ConsultantRole>,
    /// Augment the contrarian with X/Twitter search
    pub use_x_search: bool,
    /// Human-readable account of why this mode was selected
    pub routing_reason: String,
}

impl PipelineConfig {
    pub fn mode_name(&self) -> &'static str {
        self.mode.as_str()
    }

    pub fn has_consultants(&self) -> bool {
        !self.roles.is_empty()
    }
}
