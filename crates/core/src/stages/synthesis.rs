//! Synthesis stage: the final answer.
//!
//! Builds the seven-section answer from the IR, consultant analyses and meta
//! answers. Quota-class failures retry under the injected backoff policy;
//! a truncated completion gets exactly one continuation call; exhausted
//! retries degrade to a minimal answer rendered from the IR alone. The stage
//! never returns an error.

use crate::ir::summarize::{build_synthesis_prompt, render_ir};
use crate::ir::types::ResearchIr;
use crate::models::TokenUsage;
use crate::provider::{ChatModel, CompletionRequest};
use crate::retry::BackoffPolicy;
use crate::stages::consultants::{ConsultationResult, ConsultationStatus};
use crate::stages::meta::MetaAnswers;
use crate::stages::prompts;
use tracing::warn;

const SYNTHESIS_TEMPERATURE: f32 = 0.6;
const SYNTHESIS_MAX_TOKENS: u32 = 8192;
/// Tail of the draft shown to the continuation call
const CONTINUATION_TAIL_CHARS: usize = 1_500;

/// Everything synthesis reads
pub struct SynthesisInput<'a> {
    pub question: &'a str,
    pub ir: &'a ResearchIr,
    pub consultations: &'a [ConsultationResult],
    pub meta: Option<&'a MetaAnswers>,
}

/// Synthesis outcome: text is always present
pub struct SynthesisOutput {
    pub text: String,
    /// Primary path exhausted retries; text was rendered from the IR alone
    pub degraded: bool,
    /// A truncation continuation call was appended
    pub continued: bool,
    pub usage: TokenUsage,
}

fn build_prompt(input: &SynthesisInput<'_>) -> String {
    let mut prompt = build_synthesis_prompt(input.ir, input.question);

    let successful: Vec<&ConsultationResult> = input
        .consultations
        .iter()
        .filter(|c| c.status == ConsultationStatus::Success)
        .collect();
    if !successful.is_empty() {
        prompt.push_str("\n[Consultant analyses]\n");
        for result in successful {
            prompt.push_str(&format!(
                "\n--- {} consultant ---\n{}\n",
                result.role.as_str(),
                result.content
            ));
        }
    }

    if let Some(meta) = input.meta {
        prompt.push_str("\n[Clarifying questions answered before synthesis]\n");
        prompt.push_str(&meta.text);
        prompt.push('\n');
    }

    prompt
}

/// Run synthesis. Never fails; check `degraded` on the output.
pub async fn synthesize(
    model: &dyn ChatModel,
    backoff: &BackoffPolicy,
    input: SynthesisInput<'_>,
) -> SynthesisOutput {
    let prompt = build_prompt(&input);
    let mut usage = TokenUsage::default();

    let request = CompletionRequest::new(prompts::SYNTHESIS, prompt)
        .with_temperature(SYNTHESIS_TEMPERATURE)
        .with_max_output_tokens(SYNTHESIS_MAX_TOKENS);

    let completion = match backoff.run(|| model.complete(request.clone())).await {
        Ok(completion) => completion,
        Err(e) => {
            warn!(error = %e, "synthesis retries exhausted, degrading to IR-only answer");
            return SynthesisOutput {
                text: render_degraded(input.ir, input.question),
                degraded: true,
                continued: false,
                usage,
            };
        }
    };

    usage.add(completion.usage);
    let mut text = completion.text;
    let mut continued = false;

    if completion.truncated {
        match continue_output(model, &text).await {
            Ok((tail, tail_usage)) => {
                usage.add(tail_usage);
                text.push_str(&tail);
                continued = true;
            }
            Err(e) => {
                // Partial answer is still an answer
                warn!(error = %e, "continuation call failed, keeping truncated draft");
            }
        }
    }

    SynthesisOutput {
        text,
        degraded: false,
        continued,
        usage,
    }
}

async fn continue_output(
    model: &dyn ChatModel,
    draft: &str,
) -> Result<(String, TokenUsage), crate::provider::ModelError> {
    let tail: String = draft
        .chars()
        .rev()
        .take(CONTINUATION_TAIL_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let request = CompletionRequest::new(
        prompts::SYNTHESIS,
        format!(
            "Your previous answer was cut off by a length limit. Continue it from exactly where it stopped. Do not repeat or re-summarize.\n\nEnd of the answer so far:\n...{}",
            tail
        ),
    )
    .with_temperature(SYNTHESIS_TEMPERATURE)
    .with_max_output_tokens(SYNTHESIS_MAX_TOKENS);

    let completion = model.complete(request).await?;
    Ok((completion.text, completion.usage))
}

/// Minimal answer built purely from the IR. Pure function, cannot fail.
pub fn render_degraded(ir: &ResearchIr, question: &str) -> String {
    format!(
        "## Conclusion\nThe synthesis model was unavailable, so this is a minimal answer assembled directly from the collected evidence for: {}\n\n{}\n## Confidence\nlow (degraded answer, synthesis unavailable)\n",
        question,
        render_ir(ir)
    )
}
