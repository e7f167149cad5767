//! Default prompt templates bundled at compile time.

use crate::ir::types::ResearchIr;
use schemars::schema_for;

/// Router - question classification
pub const ROUTER: &str = include_str!("defaults/router.md");

/// Researcher - search-augmented evidence gathering
pub const RESEARCHER: &str = include_str!("defaults/researcher.md");

/// Extractor - findings to structured IR
pub const EXTRACTOR: &str = include_str!("defaults/extractor.md");

/// Contrarian consultant - counterarguments and edge cases
pub const CONTRARIAN: &str = include_str!("defaults/contrarian.md");

/// Structural consultant - long-horizon analysis
pub const STRUCTURAL: &str = include_str!("defaults/structural.md");

/// Checklist consultant - verification steps
pub const CHECKLIST: &str = include_str!("defaults/checklist.md");

/// Synthesis - final answer assembly
pub const SYNTHESIS: &str = include_str!("defaults/synthesis.md");

/// Strict reviewer - full-rewrite hardening pass
pub const STRICT_REVIEW: &str = include_str!("defaults/strict_review.md");

/// Secondary reviewer - critique-only pass
pub const SECONDARY_REVIEW: &str = include_str!("defaults/secondary_review.md");

/// Meta - clarifying-question pass over IR unknowns
pub const META: &str = include_str!("defaults/meta.md");

/// Direct - lightweight single-call answer
pub const DIRECT: &str = include_str!("defaults/direct.md");

pub fn router_prompt(question: &str, history_context: &str) -> String {
    let mut prompt = format!("Classify this question:\n\n{}", question);
    if !history_context.is_empty() {
        prompt.push_str(&format!(
            "\n\nRecent conversation context:\n{}",
            history_context
        ));
    }
    prompt
}

pub fn extractor_system() -> String {
    EXTRACTOR.to_string()
}

/// Extractor user prompt with the IR JSON schema embedded.
pub fn extractor_prompt(question: &str, findings: &str) -> String {
    let schema = schema_for!(ResearchIr);
    let schema_json =
        serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Original question:\n{question}\n\nRaw research findings:\n{findings}\n\nJSON schema to conform to:\n{schema_json}\n\nOutput the JSON object now."
    )
}
