//! Render the IR into prompt text.
//!
//! Two consumers: consultants get a bounded excerpt, synthesis gets the full
//! rendering plus the facts-priority and hedging constraints. Both render
//! from the normalized IR so every downstream prompt sees the same view of
//! the evidence.

use super::types::{Confidence, ResearchIr, Severity};

/// Consultant input stays well under the per-task prompt budget.
pub const EXCERPT_MAX_CHARS: usize = 8_000;

/// Render the IR body: facts with confidence marks, options, risks sorted
/// most severe first, unknowns with reasons, then the metadata block.
pub fn render_ir(ir: &ResearchIr) -> String {
    let mut out = String::new();

    out.push_str("[Confirmed facts]\n");
    if ir.facts.is_empty() {
        out.push_str("(no facts extracted)\n");
    } else {
        for fact in ir.facts_by_confidence() {
            out.push_str(&format!("{} {}\n", fact.confidence.mark(), fact.statement));
            if !fact.source_detail.is_empty() {
                out.push_str(&format!(
                    "  source: {} ({:?} confidence)\n",
                    fact.source_detail, fact.confidence
                ));
            }
            if let Some(date) = &fact.date {
                out.push_str(&format!("  date: {}\n", date));
            }
        }
    }

    if !ir.options.is_empty() {
        out.push_str("\n[Options to consider]\n");
        for opt in &ir.options {
            out.push_str(&format!("\n## {}\n", opt.name));
            if !opt.pros.is_empty() {
                out.push_str(&format!("pros: {}\n", opt.pros.join(", ")));
            }
            if !opt.cons.is_empty() {
                out.push_str(&format!("cons: {}\n", opt.cons.join(", ")));
            }
            if !opt.conditions.is_empty() {
                out.push_str(&format!("conditions: {}\n", opt.conditions.join(", ")));
            }
            if let Some(cost) = &opt.estimated_cost {
                out.push_str(&format!("estimated cost: {}\n", cost));
            }
        }
    }

    if !ir.risks.is_empty() {
        out.push_str("\n[Identified risks]\n");
        for risk in ir.risks_by_severity() {
            out.push_str(&format!(
                "[{}] {} ({})\n",
                severity_tag(risk.severity),
                risk.statement,
                risk.timeframe.label()
            ));
            if let Some(mitigation) = &risk.mitigation {
                out.push_str(&format!("  mitigation: {}\n", mitigation));
            }
        }
    }

    if !ir.unknowns.is_empty() {
        out.push_str("\n[Open questions]\n");
        for unknown in &ir.unknowns {
            out.push_str(&format!("? {}\n", unknown.question));
            out.push_str(&format!("  reason: {}\n", unknown.why_unknown.label()));
        }
    }

    out.push_str(&format!(
        "\n[Research metadata]\n- researched at: {}\n- sources: {}\n- models: {}\n",
        ir.metadata.created_at.to_rfc3339(),
        ir.metadata.sources_count,
        ir.metadata.models.join(", ")
    ));

    out
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "HIGH",
        Severity::Medium => "MEDIUM",
        Severity::Low => "LOW",
        Severity::Unknown => "UNRATED",
    }
}

/// Bounded IR excerpt used as consultant input.
pub fn ir_excerpt(ir: &ResearchIr) -> String {
    let rendered = render_ir(ir);
    match rendered.char_indices().nth(EXCERPT_MAX_CHARS) {
        Some((idx, _)) => {
            let mut cut = rendered[..idx].to_string();
            cut.push_str("\n(excerpt truncated)");
            cut
        }
        None => rendered,
    }
}

/// Full synthesis prompt: question, rendered IR, then the synthesis task
/// with the facts-priority and hedging constraints.
pub fn build_synthesis_prompt(ir: &ResearchIr, question: &str) -> String {
    format!(
        "User question:\n{question}\n\n{ir}\n[Synthesis task]\nWrite the final answer from the structured data above.\n\nHard constraints:\n1. Facts marked {confirmed} may be asserted directly.\n2. Facts marked {likely} or {reported} must be hedged (\"reportedly\", \"appears to\").\n3. Anything listed under open questions must be stated as currently unknown, never guessed.\n4. Mention risks in severity order (HIGH first).\n5. Cite source details where they are given.\n",
        question = question,
        ir = render_ir(ir),
        confirmed = Confidence::High.mark(),
        likely = Confidence::Medium.mark(),
        reported = Confidence::Low.mark(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::*;

    fn sample_ir() -> ResearchIr {
        ResearchIr {
            facts: vec![
                Fact {
                    statement: "low-confidence rumor".to_string(),
                    source: FactSource::Model,
                    source_detail: String::new(),
                    date: None,
                    confidence: Confidence::Low,
                },
                Fact {
                    statement: "confirmed filing".to_string(),
                    source: FactSource::Web,
                    source_detail: "https://sec.gov/filing".to_string(),
                    date: Some("2026-08-01".to_string()),
                    confidence: Confidence::High,
                },
            ],
            risks: vec![
                Risk {
                    statement: "minor delay".to_string(),
                    severity: Severity::Low,
                    timeframe: Timeframe::Short,
                    mitigation: None,
                },
                Risk {
                    statement: "regulatory block".to_string(),
                    severity: Severity::High,
                    timeframe: Timeframe::Medium,
                    mitigation: Some("file early".to_string()),
                },
            ],
            unknowns: vec![UnknownPoint {
                question: "final deal size?".to_string(),
                why_unknown: WhyUnknown::FutureDependent,
                impact: Impact::High,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_facts_render_confidence_first() {
        let rendered = render_ir(&sample_ir());
        let confirmed = rendered.find("confirmed filing").unwrap();
        let rumor = rendered.find("low-confidence rumor").unwrap();
        assert!(confirmed < rumor);
        assert!(rendered.contains("[confirmed] confirmed filing"));
    }

    #[test]
    fn test_risks_render_severity_first() {
        let rendered = render_ir(&sample_ir());
        let high = rendered.find("regulatory block").unwrap();
        let low = rendered.find("minor delay").unwrap();
        assert!(high < low);
        assert!(rendered.contains("[HIGH] regulatory block (medium-term)"));
    }

    #[test]
    fn test_synthesis_prompt_carries_hedging_rules() {
        let prompt = build_synthesis_prompt(&sample_ir(), "will the deal close?");
        assert!(prompt.contains("will the deal close?"));
        assert!(prompt.contains("must be hedged"));
        assert!(prompt.contains("currently unknown"));
        assert!(prompt.contains("severity order"));
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let mut ir = sample_ir();
        for i in 0..2000 {
            ir.facts.push(Fact {
                statement: format!("padding fact number {} with some extra words", i),
                source: FactSource::Model,
                source_detail: String::new(),
                date: None,
                confidence: Confidence::Unknown,
            });
        }
        let excerpt = ir_excerpt(&ir);
        assert!(excerpt.chars().count() <= EXCERPT_MAX_CHARS + 40);
        assert!(excerpt.ends_with("(excerpt truncated)"));
    }

    #[test]
    fn test_empty_ir_renders_placeholder() {
        let rendered = render_ir(&ResearchIr::default());
        assert!(rendered.contains("(no facts extracted)"));
    }
}
