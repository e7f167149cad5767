//! Review stages.
//!
//! Strict review returns a full revised answer that replaces the draft.
//! Secondary review returns a critique only; the orchestrator appends it
//! beneath the answer and never merges it in. Either stage failing means the
//! stage is skipped and the prior draft stands.

use crate::ir::extract::parse_with_repair;
use crate::ir::summarize::ir_excerpt;
use crate::ir::types::ResearchIr;
use crate::models::TokenUsage;
use crate::provider::{ChatModel, CompletionRequest, ModelError};
use crate::stages::prompts;
use serde::{Deserialize, Serialize};

const STRICT_TEMPERATURE: f32 = 0.3;
const STRICT_MAX_TOKENS: u32 = 8192;
const SECONDARY_TEMPERATURE: f32 = 0.2;
const SECONDARY_MAX_TOKENS: u32 = 2048;

/// Run the strict review: full rewrite of the draft.
pub async fn strict_review(
    model: &dyn ChatModel,
    question: &str,
    ir: &ResearchIr,
    draft: &str,
) -> Result<(String, TokenUsage), ModelError> {
    let prompt = format!(
        "Original question:\n{}\n\nResearch evidence:\n{}\n\nDraft answer to harden:\n{}",
        question,
        ir_excerpt(ir),
        draft
    );
    let request = CompletionRequest::new(prompts::STRICT_REVIEW, prompt)
        .with_temperature(STRICT_TEMPERATURE)
        .with_max_output_tokens(STRICT_MAX_TOKENS);

    let completion = model.complete(request).await?;
    if completion.text.trim().is_empty() {
        return Err(ModelError::Empty);
    }
    Ok((completion.text, completion.usage))
}

/// Secondary reviewer's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    NeedsRevision,
    Dangerous,
}

impl Verdict {
    fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ok" => Some(Verdict::Ok),
            "needs_revision" => Some(Verdict::NeedsRevision),
            "dangerous" => Some(Verdict::Dangerous),
            _ => None,
        }
    }
}

/// Critique-only output of the secondary review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    pub verdict: Verdict,
    pub problems: Vec<String>,
    pub improvements: Vec<String>,
}

impl Critique {
    /// Text appended beneath the final answer; never merged into it.
    pub fn render(&self) -> String {
        let mut out = format!(
            "---\n## Independent review\nVerdict: {}\n",
            match self.verdict {
                Verdict::Ok => "ok",
                Verdict::NeedsRevision => "needs revision",
                Verdict::Dangerous => "dangerous",
            }
        );
        if !self.problems.is_empty() {
            out.push_str("\nProblems:\n");
            for p in &self.problems {
                out.push_str(&format!("- {}\n", p));
            }
        }
        if !self.improvements.is_empty() {
            out.push_str("\nSuggested improvements:\n");
            for i in &self.improvements {
                out.push_str(&format!("- {}\n", i));
            }
        }
        out
    }
}

/// Run the secondary review: critique only, parsed from JSON.
pub async fn secondary_review(
    model: &dyn ChatModel,
    answer: &str,
    ir: &ResearchIr,
) -> Result<(Critique, TokenUsage), ModelError> {
    let prompt = format!(
        "Research evidence:\n{}\n\nFinal answer under review:\n{}",
        ir_excerpt(ir),
        answer
    );
    let request = CompletionRequest::new(prompts::SECONDARY_REVIEW, prompt)
        .with_temperature(SECONDARY_TEMPERATURE)
        .with_max_output_tokens(SECONDARY_MAX_TOKENS)
        .with_json_output();

    let completion = model.complete(request).await?;
    let value = parse_with_repair(&completion.text).ok_or_else(|| ModelError::Parse {
        message: "secondary review returned unparseable JSON".to_string(),
    })?;

    let verdict = value
        .get("verdict")
        .and_then(|v| v.as_str())
        .and_then(Verdict::parse_lenient)
        .ok_or_else(|| ModelError::Parse {
            message: "secondary review verdict missing or invalid".to_string(),
        })?;
    let string_list = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok((
        Critique {
            verdict,
            problems: string_list("problems"),
            improvements: string_list("improvements"),
        },
        completion.usage,
    ))
}
