//! # Prism Core
//!
//! Multi-model research pipeline: a question is routed to a verification
//! depth, researched with live search, distilled into a structured IR,
//! stress-tested by parallel consultants, synthesized into a sectioned
//! answer, and optionally hardened by review stages. Every phase outcome
//! lands in a processing log attached to the answer.

pub mod ir;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod stages;
pub mod state;

pub use ir::types::ResearchIr;
pub use models::{LlmProvider, ModelConfig, StageModels, TokenUsage};
pub use pipeline::{
    Orchestrator, PipelineAnswer, PipelineConfig, PipelineError, PipelineEvent, ProcessingLog,
    StageClients,
};
pub use provider::{ChatModel, Completion, CompletionRequest, ModelError, SharedModel};
pub use retry::BackoffPolicy;
