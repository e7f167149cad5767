//! Pipeline plan, audit log, and the orchestrator that runs the phases.

pub mod config;
pub mod log;
pub mod orchestrator;

pub use config::{ConsultantRole, PipelineConfig, PipelineMode};
pub use log::{PhaseStatus, PipelineEvent, ProcessingLog};
pub use orchestrator::{Orchestrator, PipelineAnswer, PipelineError, StageClients};
