//! Phase and sidecar types for the plan phase engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Implement,
    Read,
    Audit,
}

impl PhaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::Implement => "implement",
            PhaseKind::Read => "read",
            PhaseKind::Audit => "audit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in-progress",
            PhaseStatus::Done => "done",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal_ok(self) -> bool {
        matches!(self, PhaseStatus::Done | PhaseStatus::Skipped)
    }
}

/// A single unit of plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub title: String,
    pub kind: PhaseKind,
    pub status: PhaseStatus,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub context_files: Vec<String>,
    #[serde(default)]
    pub change_spec: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub git_commit: Option<String>,
    #[serde(default)]
    pub modified_files: Option<Vec<String>>,
    #[serde(default)]
    pub failure_hashes: Option<HashMap<String, String>>,
}

impl Phase {
    pub fn new(id: impl Into<String>, title: impl Into<String>, kind: PhaseKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            status: PhaseStatus::Pending,
            description: String::new(),
            depends_on: Vec::new(),
            context_files: Vec::new(),
            change_spec: None,
            output: None,
            error: None,
            git_commit: None,
            modified_files: None,
            failure_hashes: None,
        }
    }
}

/// Sidecar state for a decomposed plan: `<stem>.json` / `<stem>.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPhases {
    pub version: u32,
    pub plan_id: String,
    pub plan_file: String,
    pub plan_content_hash: String,
    pub phases: Vec<Phase>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of attempting to select and run the next phase.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// No phase is runnable right now (all done/skipped, or deps unmet).
    NothingToRun,
    /// The plan file changed since phases were decomposed.
    Stale { message: String },
    /// A failed phase was selected but lacks retry-safety records or git.
    RetryBlocked { phase_id: String, message: String },
    /// The phase ran to completion.
    Done { phase_id: String },
    /// An `audit` phase found concerns at or above medium severity.
    AuditFailed { phase_id: String, max_severity: String },
    /// The phase's runtime invocation failed (includes tool-gate blocks).
    Failed { phase_id: String, message: String },
}
