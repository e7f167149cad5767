//! End-to-end pipeline runs against scripted models.

use async_trait::async_trait;
use prism_core::models::TokenUsage;
use prism_core::pipeline::{
    ConsultantRole, Orchestrator, PhaseStatus, PipelineError, StageClients,
};
use prism_core::provider::{ChatModel, Completion, CompletionRequest, ModelError, SharedModel};
use prism_core::state::{BudgetGate, PrismDb, SessionStore, UsageLedger};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Canned {
    id: &'static str,
    text: String,
}

#[async_trait]
impl ChatModel for Canned {
    async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
        Ok(Completion {
            text: self.text.clone(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
            ..Default::default()
        })
    }
    fn model_id(&self) -> String {
        self.id.to_string()
    }
}

fn canned(id: &'static str, text: &str) -> SharedModel {
    Arc::new(Canned {
        id,
        text: text.to_string(),
    })
}

struct Hanging;

#[async_trait]
impl ChatModel for Hanging {
    async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(Completion::default())
    }
    fn model_id(&self) -> String {
        "hanging".to_string()
    }
}

struct CitingResearcher;

#[async_trait]
impl ChatModel for CitingResearcher {
    async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
        Ok(Completion {
            text: "The treatment was approved in 2025.\nTrial data shows a 40% response rate."
                .to_string(),
            citations: vec![
                "https://example.org/approval".to_string(),
                "https://example.org/trial".to_string(),
            ],
            usage: TokenUsage {
                input_tokens: 50,
                output_tokens: 100,
            },
            ..Default::default()
        })
    }
    fn model_id(&self) -> String {
        "researcher".to_string()
    }
}

const MEDICAL_CLASSIFICATION: &str = r#"{"domain": "medical", "complexity": "high", "risk_level": "high", "needs_research": true, "needs_cross_check": true, "needs_x_search": false, "notes": "treatment decision"}"#;

const EXTRACTED_IR: &str = r#"{
  "facts": [
    {"statement": "The treatment was approved in 2025", "source": "web", "source_detail": "https://example.org/approval", "confidence": "high"},
    {"statement": "Trial shows 40% response rate", "source": "web", "source_detail": "https://example.org/trial", "confidence": "medium"}
  ],
  "options": [],
  "risks": [{"statement": "long-term effects unknown", "severity": "high", "timeframe": "long"}],
  "unknowns": [{"question": "does it interact with existing medication?", "why_unknown": "insufficient_data", "impact": "high"}],
  "metadata": {}
}"#;

const CRITIQUE_JSON: &str =
    r#"{"verdict": "ok", "problems": [], "improvements": ["cite the trial size"]}"#;

fn full_verify_clients(structural: SharedModel) -> StageClients {
    let consultants = BTreeMap::from([
        (
            ConsultantRole::Contrarian,
            canned("grok-3", "contrarian: the approval could be withdrawn"),
        ),
        (ConsultantRole::Structural, structural),
        (
            ConsultantRole::Checklist,
            canned("o4-mini", "checklist: confirm dosage guidance"),
        ),
    ]);
    StageClients {
        router: canned("gemini-2.0-flash", MEDICAL_CLASSIFICATION),
        research: Arc::new(CitingResearcher),
        extractor: canned("gemini-2.5-flash", EXTRACTED_IR),
        meta: canned("gemini-2.5-flash", "1. No interaction data is published yet."),
        consultants,
        synthesis: canned("gemini-2.5-pro", "## Conclusion\nProceed with caution."),
        strict_review: canned(
            "gemini-2.5-pro",
            "## Conclusion\nProceed with caution.\n\n## Strongest counterarguments\n1. a 2. b 3. c",
        ),
        secondary_review: canned("claude", CRITIQUE_JSON),
    }
}

#[tokio::test]
async fn scenario_a_medical_high_risk_runs_full_verification() {
    let clients = full_verify_clients(canned("gpt-4o", "structural: watch renewal dates"));
    let orchestrator = Orchestrator::new(clients);

    let answer = orchestrator
        .answer("Should I switch to the new treatment?", None)
        .await
        .unwrap();

    assert_eq!(answer.mode, "full_verify");
    assert!(!answer.degraded);
    // Strict review replaced the draft, critique appended beneath it
    assert!(answer.text.contains("Strongest counterarguments"));
    assert!(answer.text.contains("Independent review"));
    assert!(answer.critique.is_some());
    assert_eq!(answer.sources.len(), 2);

    let log = &answer.processing_log;
    assert_eq!(log.status_of("router"), Some(PhaseStatus::Success));
    assert_eq!(log.status_of("research"), Some(PhaseStatus::Success));
    assert_eq!(log.status_of("extract"), Some(PhaseStatus::Success));
    assert_eq!(log.status_of("meta"), Some(PhaseStatus::Success));
    for role in ["contrarian", "structural", "checklist"] {
        assert_eq!(
            log.status_of(&format!("consultant:{}", role)),
            Some(PhaseStatus::Success),
            "role {role}"
        );
    }
    assert_eq!(log.status_of("synthesis"), Some(PhaseStatus::Success));
    assert_eq!(log.status_of("strict_review"), Some(PhaseStatus::Success));
    assert_eq!(log.status_of("secondary_review"), Some(PhaseStatus::Success));
    assert!(!answer.usage.is_zero());
}

#[tokio::test]
async fn scenario_b_consultant_timeout_still_produces_answer() {
    let clients = full_verify_clients(Arc::new(Hanging));
    let orchestrator = Orchestrator::new(clients)
        .with_timeouts(Duration::from_millis(200), Duration::from_secs(5));

    let answer = orchestrator
        .answer("Should I switch to the new treatment?", None)
        .await
        .unwrap();

    let log = &answer.processing_log;
    assert!(matches!(
        log.status_of("consultant:structural"),
        Some(PhaseStatus::Error) | Some(PhaseStatus::Skipped)
    ));
    assert_eq!(
        log.status_of("consultant:contrarian"),
        Some(PhaseStatus::Success)
    );
    assert_eq!(
        log.status_of("consultant:checklist"),
        Some(PhaseStatus::Success)
    );
    // The run still reaches a final answer
    assert!(answer.text.contains("Conclusion"));
}

#[tokio::test]
async fn light_question_skips_external_stages() {
    let mut clients = full_verify_clients(canned("gpt-4o", "unused"));
    clients.router = canned(
        "gemini-2.0-flash",
        r#"{"domain": "chitchat", "complexity": "low", "risk_level": "low", "needs_research": false}"#,
    );
    clients.synthesis = canned("gemini-2.5-flash", "Paris.");
    let orchestrator = Orchestrator::new(clients);

    let answer = orchestrator
        .answer("What is the capital of France?", None)
        .await
        .unwrap();

    assert_eq!(answer.mode, "light");
    assert_eq!(answer.text, "Paris.");
    assert!(answer.sources.is_empty());
    assert_eq!(
        answer.processing_log.status_of("direct"),
        Some(PhaseStatus::Success)
    );
    assert_eq!(answer.processing_log.status_of("research"), None);
}

#[tokio::test]
async fn budget_gate_rejects_before_any_phase() {
    let db = PrismDb::open_in_memory().unwrap();
    let ledger = UsageLedger::new(db.connection());
    // Spend past the cap: 2M input tokens of gemini-2.5-pro is $2.50
    ledger
        .record(
            "gemini-2.5-pro",
            &TokenUsage {
                input_tokens: 2_000_000,
                output_tokens: 0,
            },
        )
        .unwrap();

    let clients = full_verify_clients(canned("gpt-4o", "unused"));
    let orchestrator = Orchestrator::new(clients)
        .with_persistence(SessionStore::new(db.connection()), ledger)
        .with_budget(BudgetGate {
            max_budget_usd: 1.0,
        });

    let result = orchestrator.answer("any question", None).await;
    assert!(matches!(result, Err(PipelineError::Budget(_))));
}

#[tokio::test]
async fn research_failure_with_no_data_surfaces() {
    struct FailingResearch;

    #[async_trait]
    impl ChatModel for FailingResearch {
        async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
            Err(ModelError::Auth {
                provider: "Gemini".to_string(),
            })
        }
        fn model_id(&self) -> String {
            "failing".to_string()
        }
    }

    let mut clients = full_verify_clients(canned("gpt-4o", "unused"));
    clients.research = Arc::new(FailingResearch);
    let orchestrator = Orchestrator::new(clients);

    let result = orchestrator.answer("Should I switch?", None).await;
    assert!(matches!(result, Err(PipelineError::ResearchFailed(_))));
}

#[tokio::test]
async fn router_sees_prior_session_context() {
    struct RecordingRouter {
        prompt: Mutex<String>,
    }

    #[async_trait]
    impl ChatModel for RecordingRouter {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion, ModelError> {
            *self.prompt.lock().unwrap() = request.prompt.clone();
            Ok(Completion {
                text: r#"{"domain": "general", "complexity": "low", "risk_level": "low", "needs_research": false}"#
                    .to_string(),
                ..Default::default()
            })
        }
        fn model_id(&self) -> String {
            "recording".to_string()
        }
    }

    let db = PrismDb::open_in_memory().unwrap();
    let store = SessionStore::new(db.connection());
    store
        .append("session-ctx", "user", "What does drug X treat?")
        .unwrap();
    store
        .append("session-ctx", "assistant", "It treats condition Y.")
        .unwrap();

    let router = Arc::new(RecordingRouter {
        prompt: Mutex::new(String::new()),
    });
    let mut clients = full_verify_clients(canned("gpt-4o", "unused"));
    clients.router = router.clone();
    clients.synthesis = canned("gemini-2.5-flash", "Check with a pharmacist.");
    let orchestrator = Orchestrator::new(clients).with_persistence(
        SessionStore::new(db.connection()),
        UsageLedger::new(db.connection()),
    );

    orchestrator
        .answer("Is it safe with alcohol?", Some("session-ctx"))
        .await
        .unwrap();

    let prompt = router.prompt.lock().unwrap();
    assert!(prompt.contains("Is it safe with alcohol?"));
    assert!(prompt.contains("drug X"), "prior turns reach the router");
}

#[tokio::test]
async fn sessions_record_the_exchange() {
    let db = PrismDb::open_in_memory().unwrap();
    let clients = full_verify_clients(canned("gpt-4o", "structural view"));
    let orchestrator = Orchestrator::new(clients).with_persistence(
        SessionStore::new(db.connection()),
        UsageLedger::new(db.connection()),
    );

    orchestrator
        .answer("Should I switch treatment?", Some("session-1"))
        .await
        .unwrap();

    let store = SessionStore::new(db.connection());
    let messages = store.messages("session-1").unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].role, "assistant");
}
