//! IR extraction from raw research findings.
//!
//! Ladder: schema-constrained JSON call, strict parse, one bounded repair
//! pass with a single reparse, then a pure heuristic text split. The last
//! rung cannot fail, so extraction as a whole never returns an error; the
//! warning list says which rung produced the IR.

use super::normalize::normalize;
use super::types::ResearchIr;
use crate::models::TokenUsage;
use crate::provider::{ChatModel, CompletionRequest};
use crate::stages::prompts;
use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

/// Findings beyond this are dropped before prompting the extractor.
pub const MAX_FINDINGS_CHARS: usize = 24_000;

const EXTRACTOR_TEMPERATURE: f32 = 0.1;
const EXTRACTOR_MAX_TOKENS: u32 = 8192;

/// Everything the extractor needs from the research stage
pub struct ExtractionInput<'a> {
    pub question: &'a str,
    pub findings: &'a str,
    pub citations: &'a [String],
    pub search_queries: &'a [String],
}

/// Extraction result: an IR is always present
pub struct ExtractedIr {
    pub ir: ResearchIr,
    pub warnings: Vec<String>,
    pub usage: TokenUsage,
}

/// Extract a structured IR from raw findings. Never fails.
pub async fn extract(model: &dyn ChatModel, input: ExtractionInput<'_>) -> ExtractedIr {
    let findings = truncate_chars(input.findings, MAX_FINDINGS_CHARS);
    let mut warnings = Vec::new();
    let mut usage = TokenUsage::default();

    let raw = match call_extractor(model, input.question, findings).await {
        Ok((value, call_usage)) => {
            usage.add(call_usage);
            value
        }
        Err(reason) => {
            warn!(%reason, "extractor falling back to heuristic split");
            warnings.push(format!("Structured extraction failed ({}), used heuristic text split", reason));
            heuristic_split(findings)
        }
    };

    let (mut ir, norm_warnings) = normalize(&raw);
    warnings.extend(norm_warnings);

    // Fill metadata the model cannot know
    ir.metadata.question = input.question.to_string();
    if !ir.metadata.models.contains(&model.model_id()) {
        ir.metadata.models.push(model.model_id());
    }
    ir.metadata.sources_count = ir.metadata.sources_count.max(input.citations.len());
    if ir.metadata.search_queries.is_empty() {
        ir.metadata.search_queries = input.search_queries.to_vec();
    }

    ExtractedIr { ir, warnings, usage }
}

async fn call_extractor(
    model: &dyn ChatModel,
    question: &str,
    findings: &str,
) -> Result<(Value, TokenUsage), String> {
    let request = CompletionRequest::new(
        prompts::extractor_system(),
        prompts::extractor_prompt(question, findings),
    )
    .with_temperature(EXTRACTOR_TEMPERATURE)
    .with_max_output_tokens(EXTRACTOR_MAX_TOKENS)
    .with_json_output();

    let completion = model
        .complete(request)
        .await
        .map_err(|e| e.to_string())?;

    match parse_with_repair(&completion.text) {
        Some(value) => Ok((value, completion.usage)),
        None => Err("response was not parseable JSON".to_string()),
    }
}

/// Strict parse, then one repair pass and one reparse.
pub fn parse_with_repair(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if value.is_object() {
            return Some(value);
        }
    }
    let repaired = repair_json(text);
    serde_json::from_str::<Value>(&repaired)
        .ok()
        .filter(Value::is_object)
}

/// Bounded text-level JSON repair: strip code fences, normalize smart
/// quotes, drop trailing separators, isolate the outermost object.
pub fn repair_json(text: &str) -> String {
    let mut s = text.trim().to_string();

    // ``` or ```json fences
    if let Ok(fence) = Regex::new(r"```(?:json)?") {
        s = fence.replace_all(&s, "").to_string();
    }

    s = s
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    if let Ok(trailing) = Regex::new(r",\s*([}\]])") {
        s = trailing.replace_all(&s, "$1").to_string();
    }

    // Keep only the outermost object, dropping prose around it
    if let (Some(start), Some(end)) = (s.find('{'), s.rfind('}')) {
        if start < end {
            s = s[start..=end].to_string();
        }
    }

    s
}

/// Pure last-resort split of raw text into a facts block and a risks block.
/// Low fidelity, marked as such in source_detail and confidence.
pub fn heuristic_split(text: &str) -> Value {
    let mut facts = Vec::new();
    let mut risks = Vec::new();
    let mut in_risks = false;

    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '#', '•']).trim();
        if line.is_empty() {
            continue;
        }
        let lowered = line.to_lowercase();
        if lowered.contains("risk") || lowered.contains("caution") || lowered.contains("warning") {
            in_risks = true;
        }
        if in_risks {
            risks.push(json!({
                "statement": line,
                "severity": "unknown",
                "timeframe": "unknown",
            }));
        } else {
            facts.push(json!({
                "statement": line,
                "source": "model",
                "source_detail": "heuristic text split",
                "confidence": "low",
            }));
        }
    }

    json!({
        "facts": facts,
        "options": [],
        "risks": risks,
        "unknowns": [],
        "metadata": {},
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Confidence;
    use crate::provider::{Completion, ModelError};
    use async_trait::async_trait;

    /// Model that always returns the same canned text
    struct CannedModel(String);

    #[async_trait]
    impl ChatModel for CannedModel {
        async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
            Ok(Completion {
                text: self.0.clone(),
                ..Default::default()
            })
        }
        fn model_id(&self) -> String {
            "canned".to_string()
        }
    }

    /// Model that always errors
    struct BrokenModel;

    #[async_trait]
    impl ChatModel for BrokenModel {
        async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
            Err(ModelError::Connection {
                message: "refused".to_string(),
            })
        }
        fn model_id(&self) -> String {
            "broken".to_string()
        }
    }

    fn input<'a>(findings: &'a str) -> ExtractionInput<'a> {
        ExtractionInput {
            question: "should we migrate?",
            findings,
            citations: &[],
            search_queries: &[],
        }
    }

    #[test]
    fn test_repair_strips_fences_and_trailing_commas() {
        let broken = "```json\n{\"facts\": [{\"statement\": \"a\",}],}\n```";
        let value = parse_with_repair(broken).unwrap();
        assert_eq!(value["facts"][0]["statement"], "a");
    }

    #[test]
    fn test_repair_normalizes_smart_quotes() {
        let broken = "{\u{201c}facts\u{201d}: []}";
        assert!(parse_with_repair(broken).is_some());
    }

    #[test]
    fn test_repair_isolates_object_from_prose() {
        let noisy = "Here is the JSON you asked for:\n{\"facts\": []}\nHope that helps!";
        assert!(parse_with_repair(noisy).is_some());
    }

    #[test]
    fn test_heuristic_split_separates_risks() {
        let text = "The market grew 12% in 2025.\nVendor support is strong.\nRisks:\nLock-in could raise long-term cost.";
        let value = heuristic_split(text);
        assert_eq!(value["facts"].as_array().unwrap().len(), 2);
        assert_eq!(value["risks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_extract_never_fails_on_gibberish() {
        for text in ["", "$$$ not json at all", "{\"facts\": [truncated"] {
            let model = CannedModel(text.to_string());
            let out = extract(&model, input("some findings line")).await;
            assert!(!out.warnings.is_empty());
            // heuristic path fed from findings, not the gibberish completion
            assert!(out
                .warnings
                .iter()
                .any(|w| w.contains("heuristic") || w.contains("No facts")));
        }
    }

    #[tokio::test]
    async fn test_extract_absorbs_transport_failure() {
        let out = extract(&BrokenModel, input("fact one\nfact two")).await;
        assert_eq!(out.ir.facts.len(), 2);
        assert_eq!(out.ir.facts[0].confidence, Confidence::Low);
        assert!(out.warnings.iter().any(|w| w.contains("heuristic")));
    }

    #[tokio::test]
    async fn test_extract_happy_path_fills_metadata() {
        let model = CannedModel(
            r#"{"facts": [{"statement": "rates held", "source": "web", "confidence": "high"}]}"#
                .to_string(),
        );
        let citations = vec!["https://example.com".to_string()];
        let out = extract(
            &model,
            ExtractionInput {
                question: "q",
                findings: "findings",
                citations: &citations,
                search_queries: &[],
            },
        )
        .await;
        assert_eq!(out.ir.facts.len(), 1);
        assert_eq!(out.ir.metadata.question, "q");
        assert_eq!(out.ir.metadata.sources_count, 1);
        assert!(out.ir.metadata.models.contains(&"canned".to_string()));
    }
}
