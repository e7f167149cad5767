//! Processing log and pipeline events.
//!
//! The log is the audit trail attached to every answer: one append-only
//! entry per phase, written only by the orchestrator. Events are the live
//! view of the same information, broadcast for the server's SSE feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of one pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Success,
    /// Ran, but on a fallback path
    Degraded,
    Error,
    Skipped,
}

/// One phase-completion record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub phase: String,
    pub status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Append-only audit trail; the orchestrator is the sole writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingLog {
    entries: Vec<LogEntry>,
}

impl ProcessingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, phase: impl Into<String>, status: PhaseStatus) {
        self.record_detail(phase, status, None);
    }

    pub fn record_detail(
        &mut self,
        phase: impl Into<String>,
        status: PhaseStatus,
        detail: Option<String>,
    ) {
        self.entries.push(LogEntry {
            phase: phase.into(),
            status,
            detail,
            at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Status of the most recent entry for a phase
    pub fn status_of(&self, phase: &str) -> Option<PhaseStatus> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.phase == phase)
            .map(|e| e.status)
    }

    pub fn has_degradation(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.status, PhaseStatus::Degraded | PhaseStatus::Error))
    }
}

/// Live pipeline progress event, broadcast to the server's SSE feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    PhaseStarted {
        session_id: String,
        phase: String,
    },
    PhaseCompleted {
        session_id: String,
        phase: String,
        status: PhaseStatus,
    },
    AnswerReady {
        session_id: String,
        degraded: bool,
    },
}
