//! Meta-question stage: answer the clarifying questions the research left
//! open, before synthesis runs.
//!
//! Questions come from the IR's unknowns, highest impact first, at most
//! three per run. One call answers them all.

use crate::ir::summarize::ir_excerpt;
use crate::ir::types::{Impact, ResearchIr};
use crate::models::TokenUsage;
use crate::provider::{ChatModel, CompletionRequest, ModelError};
use crate::stages::prompts;
use tracing::debug;

const META_TEMPERATURE: f32 = 0.5;
const META_MAX_TOKENS: u32 = 2048;
const MAX_META_QUESTIONS: usize = 3;

/// Answers to the meta-questions, ready to feed synthesis
#[derive(Debug, Clone)]
pub struct MetaAnswers {
    pub questions: Vec<String>,
    pub text: String,
    pub usage: TokenUsage,
}

/// Pick up to three clarifying questions, highest impact first.
pub fn select_questions(ir: &ResearchIr) -> Vec<String> {
    let mut unknowns: Vec<_> = ir
        .unknowns
        .iter()
        .filter(|u| !u.question.is_empty())
        .collect();
    unknowns.sort_by_key(|u| match u.impact {
        Impact::High => 0,
        Impact::Medium => 1,
        Impact::Low => 2,
        Impact::Unknown => 3,
    });
    unknowns
        .into_iter()
        .take(MAX_META_QUESTIONS)
        .map(|u| u.question.clone())
        .collect()
}

/// Run the meta pass. Returns `None` when the IR has no open questions.
pub async fn run_meta(
    model: &dyn ChatModel,
    ir: &ResearchIr,
) -> Result<Option<MetaAnswers>, ModelError> {
    let questions = select_questions(ir);
    if questions.is_empty() {
        debug!("no open questions, skipping meta pass");
        return Ok(None);
    }

    let numbered: String = questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}\n", i + 1, q))
        .collect();
    let prompt = format!(
        "Research evidence:\n{}\n\nClarifying questions:\n{}",
        ir_excerpt(ir),
        numbered
    );

    let request = CompletionRequest::new(prompts::META, prompt)
        .with_temperature(META_TEMPERATURE)
        .with_max_output_tokens(META_MAX_TOKENS);

    let completion = model.complete(request).await?;
    Ok(Some(MetaAnswers {
        questions,
        text: completion.text,
        usage: completion.usage,
    }))
}
