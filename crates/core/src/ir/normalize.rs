//! IR validation and normalization.
//!
//! Takes arbitrary JSON shaped roughly like a [`ResearchIr`] and produces a
//! guaranteed-valid one plus a warning list. Invalid or missing enum values
//! coerce to `Unknown` (one warning per coerced field), non-object list
//! entries are skipped, and missing lists become empty. Normalizing an
//! already-normalized IR is a no-op with zero warnings beyond the structural
//! ones (e.g. the empty-facts warning, which is stable).

use super::types::*;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Normalize a raw JSON value into a valid `ResearchIr` plus warnings.
pub fn normalize(raw: &Value) -> (ResearchIr, Vec<String>) {
    let mut warnings = Vec::new();

    let facts = normalize_facts(raw.get("facts"), &mut warnings);
    let options = normalize_options(raw.get("options"), &mut warnings);
    let risks = normalize_risks(raw.get("risks"), &mut warnings);
    let unknowns = normalize_unknowns(raw.get("unknowns"), &mut warnings);
    let metadata = normalize_metadata(raw.get("metadata"));

    if facts.is_empty() {
        warnings.push("No facts extracted (empty facts list)".to_string());
    }

    (
        ResearchIr {
            facts,
            options,
            risks,
            unknowns,
            metadata,
        },
        warnings,
    )
}

fn str_field(obj: &Value, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn opt_str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn str_list(obj: &Value, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Coerce one enum field, warning when the raw value was present but invalid.
/// Absent or null fields take the default silently; that is the schema's
/// optional-field contract, not a data error.
fn coerce_enum<T>(
    obj: &Value,
    key: &str,
    context: &str,
    parse: impl Fn(&str) -> Option<T>,
    default: T,
    warnings: &mut Vec<String>,
) -> T {
    match obj.get(key) {
        None | Some(Value::Null) => default,
        Some(Value::String(s)) => parse(s).unwrap_or_else(|| {
            warnings.push(format!("{}: invalid {} '{}', coerced to unknown", context, key, s));
            default
        }),
        Some(other) => {
            warnings.push(format!(
                "{}: {} is not a string ({}), coerced to unknown",
                context, key, other
            ));
            default
        }
    }
}

fn entries<'a>(raw: Option<&'a Value>) -> Vec<&'a Value> {
    raw.and_then(|v| v.as_array())
        .map(|a| a.iter().collect())
        .unwrap_or_default()
}

fn normalize_facts(raw: Option<&Value>, warnings: &mut Vec<String>) -> Vec<Fact> {
    let mut facts = Vec::new();
    for (i, entry) in entries(raw).into_iter().enumerate() {
        if !entry.is_object() {
            warnings.push(format!("Fact {} is not an object, skipping", i));
            continue;
        }
        let context = format!("fact {}", i);
        let fact = Fact {
            statement: str_field(entry, "statement"),
            source: coerce_enum(
                entry,
                "source",
                &context,
                FactSource::parse_lenient,
                FactSource::Model,
                warnings,
            ),
            source_detail: str_field(entry, "source_detail"),
            date: opt_str_field(entry, "date"),
            confidence: coerce_enum(
                entry,
                "confidence",
                &context,
                Confidence::parse_lenient,
                Confidence::Unknown,
                warnings,
            ),
        };
        if fact.statement.is_empty() {
            warnings.push(format!("Fact {} has empty statement", i));
        }
        facts.push(fact);
    }
    facts
}

fn normalize_options(raw: Option<&Value>, warnings: &mut Vec<String>) -> Vec<OptionIr> {
    let mut options = Vec::new();
    for (i, entry) in entries(raw).into_iter().enumerate() {
        if !entry.is_object() {
            warnings.push(format!("Option {} is not an object, skipping", i));
            continue;
        }
        let mut name = str_field(entry, "name");
        if name.is_empty() {
            name = format!("Option {}", i + 1);
        }
        options.push(OptionIr {
            name,
            pros: str_list(entry, "pros"),
            cons: str_list(entry, "cons"),
            conditions: str_list(entry, "conditions"),
            estimated_cost: opt_str_field(entry, "estimated_cost"),
        });
    }
    options
}

fn normalize_risks(raw: Option<&Value>, warnings: &mut Vec<String>) -> Vec<Risk> {
    let mut risks = Vec::new();
    for (i, entry) in entries(raw).into_iter().enumerate() {
        if !entry.is_object() {
            warnings.push(format!("Risk {} is not an object, skipping", i));
            continue;
        }
        let context = format!("risk {}", i);
        let risk = Risk {
            statement: str_field(entry, "statement"),
            severity: coerce_enum(
                entry,
                "severity",
                &context,
                Severity::parse_lenient,
                Severity::Unknown,
                warnings,
            ),
            timeframe: coerce_enum(
                entry,
                "timeframe",
                &context,
                Timeframe::parse_lenient,
                Timeframe::Unknown,
                warnings,
            ),
            mitigation: opt_str_field(entry, "mitigation"),
        };
        if risk.statement.is_empty() {
            warnings.push(format!("Risk {} has empty statement", i));
        }
        risks.push(risk);
    }
    risks
}

fn normalize_unknowns(raw: Option<&Value>, warnings: &mut Vec<String>) -> Vec<UnknownPoint> {
    let mut unknowns = Vec::new();
    for (i, entry) in entries(raw).into_iter().enumerate() {
        if !entry.is_object() {
            warnings.push(format!("Unknown {} is not an object, skipping", i));
            continue;
        }
        let context = format!("unknown {}", i);
        let unknown = UnknownPoint {
            question: str_field(entry, "question"),
            why_unknown: coerce_enum(
                entry,
                "why_unknown",
                &context,
                WhyUnknown::parse_lenient,
                WhyUnknown::Unknown,
                warnings,
            ),
            impact: coerce_enum(
                entry,
                "impact",
                &context,
                Impact::parse_lenient,
                Impact::Unknown,
                warnings,
            ),
        };
        if unknown.question.is_empty() {
            warnings.push(format!("Unknown {} has empty question", i));
        }
        unknowns.push(unknown);
    }
    unknowns
}

fn normalize_metadata(raw: Option<&Value>) -> ResearchMetadata {
    let obj = raw.cloned().unwrap_or(Value::Null);
    let created_at = obj
        .get("created_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or_else(Utc::now);

    ResearchMetadata {
        question: str_field(&obj, "question"),
        language: {
            let lang = str_field(&obj, "language");
            if lang.is_empty() {
                "en".to_string()
            } else {
                lang
            }
        },
        created_at,
        models: str_list(&obj, "models"),
        sources_count: obj
            .get("sources_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize,
        search_queries: str_list(&obj, "search_queries"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_out_of_set_enums_coerce_to_unknown() {
        let raw = json!({
            "facts": [{
                "statement": "X acquired Y",
                "source": "carrier_pigeon",
                "confidence": "absolutely"
            }],
            "risks": [{
                "statement": "regulatory pushback",
                "severity": "catastrophic",
                "timeframe": "eventually"
            }],
            "unknowns": [{
                "question": "deal size?",
                "why_unknown": "nobody_said",
                "impact": 3
            }]
        });
        let (ir, warnings) = normalize(&raw);

        assert_eq!(ir.facts[0].source, FactSource::Model);
        assert_eq!(ir.facts[0].confidence, Confidence::Unknown);
        assert_eq!(ir.risks[0].severity, Severity::Unknown);
        assert_eq!(ir.risks[0].timeframe, Timeframe::Unknown);
        assert_eq!(ir.unknowns[0].why_unknown, WhyUnknown::Unknown);
        assert_eq!(ir.unknowns[0].impact, Impact::Unknown);

        // One warning per coerced field
        let coercions = warnings.iter().filter(|w| w.contains("coerced")).count();
        assert_eq!(coercions, 6);
    }

    #[test]
    fn test_empty_facts_records_warning() {
        let (ir, warnings) = normalize(&json!({}));
        assert!(ir.facts.is_empty());
        assert!(warnings.iter().any(|w| w.contains("No facts extracted")));
    }

    #[test]
    fn test_non_object_entries_skipped() {
        let raw = json!({"facts": ["just a string", {"statement": "real fact", "confidence": "high"}]});
        let (ir, warnings) = normalize(&raw);
        assert_eq!(ir.facts.len(), 1);
        assert_eq!(ir.facts[0].confidence, Confidence::High);
        assert!(warnings.iter().any(|w| w.contains("not an object")));
    }

    #[test]
    fn test_youtube_alias_accepted() {
        let raw = json!({"facts": [{"statement": "s", "source": "youtube"}]});
        let (ir, warnings) = normalize(&raw);
        assert_eq!(ir.facts[0].source, FactSource::Video);
        assert!(!warnings.iter().any(|w| w.contains("source")));
    }

    #[test]
    fn test_idempotent() {
        let raw = json!({
            "facts": [{"statement": "s", "source": "wat", "confidence": "high"}],
            "risks": [{"statement": "r", "severity": "high", "timeframe": "short"}],
            "metadata": {"question": "q", "language": "en",
                         "created_at": "2026-08-01T00:00:00Z",
                         "models": ["gemini-2.5-pro"], "sources_count": 2,
                         "search_queries": ["q1"]}
        });
        let (first, _) = normalize(&raw);
        let reserialized = serde_json::to_value(&first).unwrap();
        let (second, warnings) = normalize(&reserialized);
        assert_eq!(first, second);
        // No coercion warnings the second time around
        assert!(!warnings.iter().any(|w| w.contains("coerced")));
    }
}
