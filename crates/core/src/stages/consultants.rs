//! Parallel consultant pool.
//!
//! Up to three role-tagged tasks fan out over a `JoinSet`, each with its own
//! timeout, joined under a pool-wide deadline. Isolation is structural: every
//! task resolves to its own `ConsultationResult`, so one failure or timeout
//! can neither cancel nor delay its peers. Roles still pending when the pool
//! deadline fires are marked skipped.

use crate::ir::summarize::ir_excerpt;
use crate::ir::types::ResearchIr;
use crate::models::TokenUsage;
use crate::pipeline::config::ConsultantRole;
use crate::provider::{CompletionRequest, SharedModel};
use crate::stages::prompts;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::warn;

/// Per-task wall clock limit
pub const TASK_TIMEOUT: Duration = Duration::from_secs(60);
/// Pool-wide deadline; pending tasks beyond this are skipped
pub const POOL_TIMEOUT: Duration = Duration::from_secs(90);

const CONSULTANT_MAX_TOKENS: u32 = 2048;

/// Terminal state of one consultant task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Success,
    Error,
    Empty,
    Skipped,
}

/// One consultant task's outcome; never mutated after finalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationResult {
    pub role: ConsultantRole,
    pub status: ConsultationStatus,
    pub content: String,
    pub error_detail: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl ConsultationResult {
    fn skipped(role: ConsultantRole, detail: &str) -> Self {
        Self {
            role,
            status: ConsultationStatus::Skipped,
            content: String::new(),
            error_detail: Some(detail.to_string()),
            usage: None,
        }
    }
}

/// Declarative role descriptor: the lens, its sampling temperature, and
/// whether it runs with live search.
struct RoleDescriptor {
    system: &'static str,
    temperature: f32,
    wants_search: bool,
}

fn descriptor(role: ConsultantRole) -> RoleDescriptor {
    match role {
        ConsultantRole::Contrarian => RoleDescriptor {
            system: prompts::CONTRARIAN,
            temperature: 0.8,
            wants_search: true,
        },
        ConsultantRole::Structural => RoleDescriptor {
            system: prompts::STRUCTURAL,
            temperature: 0.6,
            wants_search: false,
        },
        ConsultantRole::Checklist => RoleDescriptor {
            system: prompts::CHECKLIST,
            temperature: 0.3,
            wants_search: false,
        },
    }
}

async fn run_one(
    role: ConsultantRole,
    model: SharedModel,
    excerpt: String,
    use_x_search: bool,
    task_timeout: Duration,
) -> ConsultationResult {
    let desc = descriptor(role);
    let mut request = CompletionRequest::new(
        desc.system,
        format!("Structured research excerpt:\n\n{}", excerpt),
    )
    .with_temperature(desc.temperature)
    .with_max_output_tokens(CONSULTANT_MAX_TOKENS);
    if desc.wants_search && use_x_search {
        request = request.with_search();
    }

    match timeout(task_timeout, model.complete(request)).await {
        Ok(Ok(completion)) if completion.text.trim().is_empty() => ConsultationResult {
            role,
            status: ConsultationStatus::Empty,
            content: String::new(),
            error_detail: None,
            usage: Some(completion.usage),
        },
        Ok(Ok(completion)) => ConsultationResult {
            role,
            status: ConsultationStatus::Success,
            content: completion.text,
            error_detail: None,
            usage: Some(completion.usage),
        },
        Ok(Err(e)) => ConsultationResult {
            role,
            status: ConsultationStatus::Error,
            content: String::new(),
            error_detail: Some(e.to_string()),
            usage: None,
        },
        Err(_) => ConsultationResult {
            role,
            status: ConsultationStatus::Error,
            content: String::new(),
            error_detail: Some(format!("timed out after {}s", task_timeout.as_secs())),
            usage: None,
        },
    }
}

/// Fan out the enabled roles and join with a pool-wide deadline.
///
/// Always returns one result per requested role. Roles with no model
/// configured are skipped up front.
pub async fn consult_all(
    models: &BTreeMap<ConsultantRole, SharedModel>,
    roles: &BTreeSet<ConsultantRole>,
    ir: &ResearchIr,
    use_x_search: bool,
    task_timeout: Duration,
    pool_timeout: Duration,
) -> Vec<ConsultationResult> {
    let excerpt = ir_excerpt(ir);
    let mut set = JoinSet::new();
    let mut pending: BTreeSet<ConsultantRole> = BTreeSet::new();
    let mut results = Vec::new();

    for &role in roles {
        match models.get(&role) {
            Some(model) => {
                pending.insert(role);
                set.spawn(run_one(
                    role,
                    model.clone(),
                    excerpt.clone(),
                    use_x_search,
                    task_timeout,
                ));
            }
            None => {
                warn!(role = role.as_str(), "no model configured for role");
                results.push(ConsultationResult::skipped(role, "no model configured"));
            }
        }
    }

    let deadline = Instant::now() + pool_timeout;
    while !pending.is_empty() {
        match timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok(result))) => {
                pending.remove(&result.role);
                results.push(result);
            }
            Ok(Some(Err(join_err))) => {
                // Task panicked; its role stays pending and settles in the
                // drain below while peers keep running
                warn!(error = %join_err, "consultant task failed to join");
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    pending = pending.len(),
                    "pool deadline reached, skipping pending consultants"
                );
                set.abort_all();
                break;
            }
        }
    }

    for role in pending {
        results.push(ConsultationResult::skipped(
            role,
            "pool deadline reached before completion",
        ));
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatModel, Completion, ModelError};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct InstantModel(&'static str);

    #[async_trait]
    impl ChatModel for InstantModel {
        async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
            Ok(Completion {
                text: self.0.to_string(),
                ..Default::default()
            })
        }
        fn model_id(&self) -> String {
            "instant".to_string()
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
            Err(ModelError::Connection {
                message: "refused".to_string(),
            })
        }
        fn model_id(&self) -> String {
            "failing".to_string()
        }
    }

    struct HangingModel;

    #[async_trait]
    impl ChatModel for HangingModel {
        async fn complete(&self, _: CompletionRequest) -> Result<Completion, ModelError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Completion::default())
        }
        fn model_id(&self) -> String {
            "hanging".to_string()
        }
    }

    fn all_roles() -> BTreeSet<ConsultantRole> {
        BTreeSet::from([
            ConsultantRole::Contrarian,
            ConsultantRole::Structural,
            ConsultantRole::Checklist,
        ])
    }

    fn status_of(results: &[ConsultationResult], role: ConsultantRole) -> ConsultationStatus {
        results.iter().find(|r| r.role == role).unwrap().status
    }

    #[tokio::test]
    async fn test_one_failure_leaves_peers_successful() {
        let models = BTreeMap::from([
            (
                ConsultantRole::Contrarian,
                Arc::new(InstantModel("contrarian view")) as SharedModel,
            ),
            (
                ConsultantRole::Structural,
                Arc::new(FailingModel) as SharedModel,
            ),
            (
                ConsultantRole::Checklist,
                Arc::new(InstantModel("checklist")) as SharedModel,
            ),
        ]);
        let results = consult_all(
            &models,
            &all_roles(),
            &ResearchIr::default(),
            false,
            TASK_TIMEOUT,
            POOL_TIMEOUT,
        )
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(
            status_of(&results, ConsultantRole::Contrarian),
            ConsultationStatus::Success
        );
        assert_eq!(
            status_of(&results, ConsultantRole::Structural),
            ConsultationStatus::Error
        );
        assert_eq!(
            status_of(&results, ConsultantRole::Checklist),
            ConsultationStatus::Success
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_isolated_to_its_role() {
        let models = BTreeMap::from([
            (
                ConsultantRole::Contrarian,
                Arc::new(InstantModel("fast")) as SharedModel,
            ),
            (
                ConsultantRole::Structural,
                Arc::new(HangingModel) as SharedModel,
            ),
        ]);
        let roles = BTreeSet::from([ConsultantRole::Contrarian, ConsultantRole::Structural]);
        let results = consult_all(
            &models,
            &roles,
            &ResearchIr::default(),
            false,
            Duration::from_secs(60),
            Duration::from_secs(90),
        )
        .await;

        assert_eq!(
            status_of(&results, ConsultantRole::Contrarian),
            ConsultationStatus::Success
        );
        let structural = results
            .iter()
            .find(|r| r.role == ConsultantRole::Structural)
            .unwrap();
        assert_eq!(structural.status, ConsultationStatus::Error);
        assert!(structural
            .error_detail
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_deadline_marks_pending_skipped() {
        let models = BTreeMap::from([(
            ConsultantRole::Checklist,
            Arc::new(HangingModel) as SharedModel,
        )]);
        let roles = BTreeSet::from([ConsultantRole::Checklist]);
        // Pool deadline shorter than the task timeout
        let results = consult_all(
            &models,
            &roles,
            &ResearchIr::default(),
            false,
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ConsultationStatus::Skipped);
    }

    #[tokio::test]
    async fn test_missing_model_skipped_up_front() {
        let models = BTreeMap::from([(
            ConsultantRole::Contrarian,
            Arc::new(InstantModel("view")) as SharedModel,
        )]);
        let results = consult_all(
            &models,
            &all_roles(),
            &ResearchIr::default(),
            false,
            TASK_TIMEOUT,
            POOL_TIMEOUT,
        )
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(
            status_of(&results, ConsultantRole::Structural),
            ConsultationStatus::Skipped
        );
    }

    #[tokio::test]
    async fn test_empty_completion_marked_empty() {
        let models = BTreeMap::from([(
            ConsultantRole::Checklist,
            Arc::new(InstantModel("  ")) as SharedModel,
        )]);
        let roles = BTreeSet::from([ConsultantRole::Checklist]);
        let results = consult_all(
            &models,
            &roles,
            &ResearchIr::default(),
            false,
            TASK_TIMEOUT,
            POOL_TIMEOUT,
        )
        .await;
        assert_eq!(results[0].status, ConsultationStatus::Empty);
    }
}
