//! Research stage: one search-augmented call.
//!
//! Deliberately has no retry of its own; the orchestrator owns retry policy
//! and decides what a research failure means for the rest of the run.

use crate::models::TokenUsage;
use crate::provider::{ChatModel, CompletionRequest, ModelError};
use crate::stages::prompts;
use tracing::debug;

const RESEARCH_TEMPERATURE: f32 = 0.4;
const RESEARCH_MAX_TOKENS: u32 = 8192;

/// Unstructured output of the research call
#[derive(Debug, Clone, Default)]
pub struct RawFindings {
    pub text: String,
    pub citations: Vec<String>,
    /// Search queries issued, when the provider reports them
    pub queries: Vec<String>,
    pub usage: TokenUsage,
}

/// Run the research call. `history_context` carries retrieved prior-session
/// context and may be empty.
pub async fn research(
    model: &dyn ChatModel,
    question: &str,
    history_context: &str,
) -> Result<RawFindings, ModelError> {
    let mut prompt = format!("Research this question:\n\n{}", question);
    if !history_context.is_empty() {
        prompt.push_str(&format!(
            "\n\nRelevant context from earlier conversations:\n{}",
            history_context
        ));
    }

    let request = CompletionRequest::new(prompts::RESEARCHER, prompt)
        .with_temperature(RESEARCH_TEMPERATURE)
        .with_max_output_tokens(RESEARCH_MAX_TOKENS)
        .with_search();

    let completion = model.complete(request).await?;
    debug!(
        sources = completion.citations.len(),
        chars = completion.text.len(),
        "research complete"
    );

    Ok(RawFindings {
        text: completion.text,
        citations: completion.citations,
        queries: completion.search_queries,
        usage: completion.usage,
    })
}
