//! Result and progress types returned across the `ForgeOrchestrator` contract.

use std::path::PathBuf;

/// Outcome of `run`/`resume`'s final round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalVerdict {
    ReadyToApprove,
    NeedsRevision,
    Cancelled,
}

impl FinalVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            FinalVerdict::ReadyToApprove => "ready_to_approve",
            FinalVerdict::NeedsRevision => "needs_revision",
            FinalVerdict::Cancelled => "cancelled",
        }
    }
}

/// Result of a completed (or cancelled) `run`/`resume` invocation.
#[derive(Debug, Clone)]
pub struct ForgeRunResult {
    pub plan_id: String,
    pub file_path: PathBuf,
    pub rounds: u32,
    pub reached_max_rounds: bool,
    pub final_verdict: FinalVerdict,
    pub plan_summary: String,
    pub error: Option<String>,
}

/// A single progress notification. `force` means the listener must flush any
/// throttling — used on terminal messages.
#[derive(Debug, Clone)]
pub struct ForgeProgress {
    pub message: String,
    pub force: bool,
}

impl ForgeProgress {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            force: false,
        }
    }

    pub fn forced(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            force: true,
        }
    }
}

/// Callback invoked for every progress notification during a run.
pub type ProgressCallback = Box<dyn Fn(ForgeProgress) + Send + Sync>;
