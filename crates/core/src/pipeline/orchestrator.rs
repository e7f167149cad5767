//! Pipeline orchestrator.
//!
//! Owns the sequential phase run, the processing log, retry policy and
//! usage accumulation. Failure policy: the budget gate and a total research
//! failure with no partial data are the only errors that reach the caller;
//! everything else is absorbed into a degraded-but-present answer, visible
//! in the processing log.

use crate::ir::extract::{extract, ExtractionInput};
use crate::ir::types::ResearchIr;
use crate::models::TokenUsage;
use crate::pipeline::config::{ConsultantRole, PipelineConfig, PipelineMode};
use crate::pipeline::log::{PhaseStatus, PipelineEvent, ProcessingLog};
use crate::provider::{CompletionRequest, ModelError, SharedModel};
use crate::retry::BackoffPolicy;
use crate::stages::consultants::{self, ConsultationResult, ConsultationStatus};
use crate::stages::meta::{run_meta, MetaAnswers};
use crate::stages::prompts;
use crate::stages::research::research;
use crate::stages::review::{secondary_review, strict_review, Critique};
use crate::stages::router::classify;
use crate::stages::synthesis::{render_degraded, synthesize, SynthesisInput};
use crate::state::{BudgetExceeded, BudgetGate, SessionStore, UsageLedger};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

const HISTORY_CONTEXT_MAX_CHARS: usize = 2_000;
const DIRECT_MAX_TOKENS: u32 = 2048;

/// Errors that may reach the caller
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    #[error("Research failed with no partial data: {0}")]
    ResearchFailed(ModelError),
}

/// One model handle per stage; consultants get one per role.
pub struct StageClients {
    pub router: SharedModel,
    pub research: SharedModel,
    pub extractor: SharedModel,
    pub meta: SharedModel,
    pub consultants: BTreeMap<ConsultantRole, SharedModel>,
    pub synthesis: SharedModel,
    pub strict_review: SharedModel,
    pub secondary_review: SharedModel,
}

/// The caller-facing answer object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineAnswer {
    pub session_id: String,
    pub text: String,
    /// Secondary-review critique, also appended beneath `text`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique: Option<Critique>,
    pub sources: Vec<String>,
    pub processing_log: ProcessingLog,
    pub usage: TokenUsage,
    pub degraded: bool,
    pub mode: String,
    pub routing_reason: String,
}

/// Drives a question through the full pipeline.
pub struct Orchestrator {
    clients: StageClients,
    backoff: BackoffPolicy,
    budget: BudgetGate,
    sessions: Option<SessionStore>,
    ledger: Option<UsageLedger>,
    events: Option<broadcast::Sender<PipelineEvent>>,
    task_timeout: Duration,
    pool_timeout: Duration,
}

impl Orchestrator {
    pub fn new(clients: StageClients) -> Self {
        Self {
            clients,
            backoff: BackoffPolicy::default(),
            budget: BudgetGate::default(),
            sessions: None,
            ledger: None,
            events: None,
            task_timeout: consultants::TASK_TIMEOUT,
            pool_timeout: consultants::POOL_TIMEOUT,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_budget(mut self, budget: BudgetGate) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_persistence(mut self, sessions: SessionStore, ledger: UsageLedger) -> Self {
        self.sessions = Some(sessions);
        self.ledger = Some(ledger);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_timeouts(mut self, task: Duration, pool: Duration) -> Self {
        self.task_timeout = task;
        self.pool_timeout = pool;
        self
    }

    /// Answer a question. `session_id` groups the exchange in the store;
    /// `None` creates a throwaway session.
    #[instrument(skip(self, question), fields(chars = question.len()))]
    pub async fn answer(
        &self,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<PipelineAnswer, PipelineError> {
        // Budget gate: the one check that can reject the whole request
        if let Some(ledger) = &self.ledger {
            match ledger.totals() {
                Ok(totals) => self.budget.check(&totals)?,
                Err(e) => warn!(error = %e, "could not read usage totals, skipping budget gate"),
            }
        }

        let session_id = session_id
            .map(String::from)
            .unwrap_or_else(|| format!("s-{}", Utc::now().timestamp_millis()));
        let mut run = Run {
            orchestrator: self,
            session_id: session_id.clone(),
            log: ProcessingLog::new(),
            usage: TokenUsage::default(),
            usage_by_model: Vec::new(),
        };

        let answer = run.execute(question).await?;

        // Persist outside the phase sequence; failures only warn
        if let Some(sessions) = &self.sessions {
            if let Err(e) = sessions
                .append(&session_id, "user", question)
                .and_then(|_| sessions.append(&session_id, "assistant", &answer.text))
            {
                warn!(error = %e, "failed to persist session messages");
            }
        }
        if let Some(ledger) = &self.ledger {
            for (model_id, usage) in &run.usage_by_model {
                if let Err(e) = ledger.record(model_id, usage) {
                    warn!(error = %e, "failed to record usage");
                }
            }
        }

        self.emit(PipelineEvent::AnswerReady {
            session_id,
            degraded: answer.degraded,
        });

        Ok(answer)
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn history_context(&self, session_id: &str) -> String {
        let Some(sessions) = &self.sessions else {
            return String::new();
        };
        let messages = match sessions.messages(session_id) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "failed to load session history");
                return String::new();
            }
        };
        let mut context = String::new();
        for message in messages.iter().rev().take(6).rev() {
            context.push_str(&format!("{}: {}\n", message.role, message.content));
        }
        // Drop from the front so the newest turns survive the cap
        let total = context.chars().count();
        if total > HISTORY_CONTEXT_MAX_CHARS {
            context = context
                .chars()
                .skip(total - HISTORY_CONTEXT_MAX_CHARS)
                .collect();
        }
        context
    }
}

/// Per-request mutable state, threaded through the phases
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    session_id: String,
    log: ProcessingLog,
    usage: TokenUsage,
    usage_by_model: Vec<(String, TokenUsage)>,
}

impl Run<'_> {
    fn phase_started(&self, phase: &str) {
        self.orchestrator.emit(PipelineEvent::PhaseStarted {
            session_id: self.session_id.clone(),
            phase: phase.to_string(),
        });
    }

    fn record(&mut self, phase: &str, status: PhaseStatus, detail: Option<String>) {
        self.log.record_detail(phase, status, detail);
        self.orchestrator.emit(PipelineEvent::PhaseCompleted {
            session_id: self.session_id.clone(),
            phase: phase.to_string(),
            status,
        });
    }

    fn track_usage(&mut self, model_id: String, usage: TokenUsage) {
        self.usage.add(usage);
        self.usage_by_model.push((model_id, usage));
    }

    async fn execute(&mut self, question: &str) -> Result<PipelineAnswer, PipelineError> {
        let clients = &self.orchestrator.clients;

        // Router sees the same session context the researcher gets
        let history = self.orchestrator.history_context(&self.session_id);

        self.phase_started("router");
        let (classification, router_usage) =
            classify(clients.router.as_ref(), question, &history).await;
        self.track_usage(clients.router.model_id(), router_usage);
        let config = PipelineConfig::from_classification(&classification);
        info!(mode = config.mode_name(), reason = %config.routing_reason, "routed");
        self.record(
            "router",
            PhaseStatus::Success,
            Some(config.routing_reason.clone()),
        );

        if config.mode == PipelineMode::Light {
            return Ok(self.light_answer(question, &config).await);
        }

        // Research, with orchestrator-owned retry
        self.phase_started("research");
        let findings = match self
            .orchestrator
            .backoff
            .run(|| research(clients.research.as_ref(), question, &history))
            .await
        {
            Ok(findings) => {
                self.track_usage(clients.research.model_id(), findings.usage);
                self.record("research", PhaseStatus::Success, None);
                findings
            }
            Err(e) => {
                self.record("research", PhaseStatus::Error, Some(e.to_string()));
                return Err(PipelineError::ResearchFailed(e));
            }
        };

        // Extraction: total, never fails
        self.phase_started("extract");
        let extracted = extract(
            clients.extractor.as_ref(),
            ExtractionInput {
                question,
                findings: &findings.text,
                citations: &findings.citations,
                search_queries: &findings.queries,
            },
        )
        .await;
        self.track_usage(clients.extractor.model_id(), extracted.usage);
        let extract_status = if extracted
            .warnings
            .iter()
            .any(|w| w.contains("heuristic"))
        {
            PhaseStatus::Degraded
        } else {
            PhaseStatus::Success
        };
        self.record(
            "extract",
            extract_status,
            (!extracted.warnings.is_empty()).then(|| extracted.warnings.join("; ")),
        );
        let ir = extracted.ir;

        // Meta-questions
        let meta = self.meta_phase(&config, &ir).await;

        // Consultants
        let consultations = self.consultant_phase(&config, &ir).await;

        // Synthesis
        self.phase_started("synthesis");
        let synthesis = synthesize(
            clients.synthesis.as_ref(),
            &self.orchestrator.backoff,
            SynthesisInput {
                question,
                ir: &ir,
                consultations: &consultations,
                meta: meta.as_ref(),
            },
        )
        .await;
        self.track_usage(clients.synthesis.model_id(), synthesis.usage);
        self.record(
            "synthesis",
            if synthesis.degraded {
                PhaseStatus::Degraded
            } else {
                PhaseStatus::Success
            },
            synthesis
                .continued
                .then(|| "continuation appended after truncation".to_string()),
        );
        let mut text = synthesis.text;
        let mut degraded = synthesis.degraded;

        // Strict review: full rewrite or keep the draft
        if config.enable_strict_review {
            self.phase_started("strict_review");
            match strict_review(clients.strict_review.as_ref(), question, &ir, &text).await {
                Ok((revised, usage)) => {
                    self.track_usage(clients.strict_review.model_id(), usage);
                    text = revised;
                    self.record("strict_review", PhaseStatus::Success, None);
                }
                Err(e) => {
                    warn!(error = %e, "strict review failed, keeping draft");
                    self.record("strict_review", PhaseStatus::Error, Some(e.to_string()));
                    degraded = true;
                }
            }
        } else {
            self.record(
                "strict_review",
                PhaseStatus::Skipped,
                Some("disabled by router".to_string()),
            );
        }

        // Secondary review: critique appended, never merged
        let mut critique = None;
        if config.enable_secondary_review {
            self.phase_started("secondary_review");
            match secondary_review(clients.secondary_review.as_ref(), &text, &ir).await {
                Ok((result, usage)) => {
                    self.track_usage(clients.secondary_review.model_id(), usage);
                    text.push_str("\n\n");
                    text.push_str(&result.render());
                    critique = Some(result);
                    self.record("secondary_review", PhaseStatus::Success, None);
                }
                Err(e) => {
                    warn!(error = %e, "secondary review failed, keeping answer as-is");
                    self.record("secondary_review", PhaseStatus::Error, Some(e.to_string()));
                }
            }
        } else {
            self.record(
                "secondary_review",
                PhaseStatus::Skipped,
                Some("disabled by router".to_string()),
            );
        }

        Ok(PipelineAnswer {
            session_id: self.session_id.clone(),
            text,
            critique,
            sources: findings.citations,
            processing_log: self.log.clone(),
            usage: self.usage,
            degraded,
            mode: config.mode_name().to_string(),
            routing_reason: config.routing_reason,
        })
    }

    /// Lightweight path: one direct call, no external stages.
    async fn light_answer(&mut self, question: &str, config: &PipelineConfig) -> PipelineAnswer {
        let clients = &self.orchestrator.clients;
        self.phase_started("direct");
        let request = CompletionRequest::new(prompts::DIRECT, question)
            .with_max_output_tokens(DIRECT_MAX_TOKENS);
        let (text, degraded) = match self
            .orchestrator
            .backoff
            .run(|| clients.synthesis.complete(request.clone()))
            .await
        {
            Ok(completion) => {
                self.track_usage(clients.synthesis.model_id(), completion.usage);
                self.record("direct", PhaseStatus::Success, None);
                (completion.text, false)
            }
            Err(e) => {
                warn!(error = %e, "direct answer failed");
                self.record("direct", PhaseStatus::Degraded, Some(e.to_string()));
                (render_degraded(&ResearchIr::default(), question), true)
            }
        };

        PipelineAnswer {
            session_id: self.session_id.clone(),
            text,
            critique: None,
            sources: Vec::new(),
            processing_log: self.log.clone(),
            usage: self.usage,
            degraded,
            mode: config.mode_name().to_string(),
            routing_reason: config.routing_reason.clone(),
        }
    }

    async fn meta_phase(
        &mut self,
        config: &PipelineConfig,
        ir: &ResearchIr,
    ) -> Option<MetaAnswers> {
        if !config.enable_meta {
            self.record(
                "meta",
                PhaseStatus::Skipped,
                Some("disabled by router".to_string()),
            );
            return None;
        }
        self.phase_started("meta");
        match run_meta(self.orchestrator.clients.meta.as_ref(), ir).await {
            Ok(Some(answers)) => {
                self.track_usage(
                    self.orchestrator.clients.meta.model_id(),
                    answers.usage,
                );
                self.record("meta", PhaseStatus::Success, None);
                Some(answers)
            }
            Ok(None) => {
                self.record(
                    "meta",
                    PhaseStatus::Skipped,
                    Some("no open questions".to_string()),
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "meta pass failed");
                self.record("meta", PhaseStatus::Error, Some(e.to_string()));
                None
            }
        }
    }

    async fn consultant_phase(
        &mut self,
        config: &PipelineConfig,
        ir: &ResearchIr,
    ) -> Vec<ConsultationResult> {
        if !config.has_consultants() {
            self.record(
                "consultants",
                PhaseStatus::Skipped,
                Some("no roles enabled".to_string()),
            );
            return Vec::new();
        }

        self.phase_started("consultants");
        let results = consultants::consult_all(
            &self.orchestrator.clients.consultants,
            &config.roles,
            ir,
            config.use_x_search,
            self.orchestrator.task_timeout,
            self.orchestrator.pool_timeout,
        )
        .await;

        for result in &results {
            if let Some(usage) = &result.usage {
                if let Some(model) = self.orchestrator.clients.consultants.get(&result.role) {
                    self.track_usage(model.model_id(), *usage);
                }
            }
            let status = match result.status {
                ConsultationStatus::Success => PhaseStatus::Success,
                ConsultationStatus::Empty => PhaseStatus::Degraded,
                ConsultationStatus::Error => PhaseStatus::Error,
                ConsultationStatus::Skipped => PhaseStatus::Skipped,
            };
            self.record(
                &format!("consultant:{}", result.role.as_str()),
                status,
                result.error_detail.clone(),
            );
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatModel, Completion};
    use crate::state::PrismDb;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullModel;

    #[async_trait]
    impl ChatModel for NullModel {
        async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
            Ok(Completion::default())
        }
        fn model_id(&self) -> String {
            "null".to_string()
        }
    }

    fn null_clients() -> StageClients {
        let null: SharedModel = Arc::new(NullModel);
        StageClients {
            router: null.clone(),
            research: null.clone(),
            extractor: null.clone(),
            meta: null.clone(),
            consultants: BTreeMap::new(),
            synthesis: null.clone(),
            strict_review: null.clone(),
            secondary_review: null,
        }
    }

    #[test]
    fn test_history_context_keeps_most_recent_turns() {
        let db = PrismDb::open_in_memory().unwrap();
        let store = SessionStore::new(db.connection());
        store
            .append("s", "user", &"old ".repeat(800))
            .unwrap();
        store
            .append("s", "assistant", "the needle fact about dosage")
            .unwrap();

        let orchestrator = Orchestrator::new(null_clients()).with_persistence(
            SessionStore::new(db.connection()),
            UsageLedger::new(db.connection()),
        );

        let context = orchestrator.history_context("s");
        assert!(context.chars().count() <= HISTORY_CONTEXT_MAX_CHARS);
        assert!(context.contains("the needle fact about dosage"));
        assert!(context.ends_with("the needle fact about dosage\n"));
    }

    #[test]
    fn test_history_context_empty_without_store() {
        let orchestrator = Orchestrator::new(null_clients());
        assert!(orchestrator.history_context("s").is_empty());
    }
}
