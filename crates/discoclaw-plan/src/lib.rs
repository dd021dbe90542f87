//! Plan manager and phase engine (spec.md §4.7): decomposing a plan's
//! `## Changes` section into a dependency-ordered set of phases, running
//! them with per-phase git snapshots and retry-safety, and closing the plan
//! once every phase lands.

pub mod decompose;
pub mod error;
pub mod git;
pub mod manager;
pub mod persistence;
pub mod subsystem;
pub mod types;

pub use decompose::{decompose, extract_file_paths};
pub use error::{PlanError, Result};
pub use manager::PlanManager;
pub use subsystem::PlanHandler;
pub use types::{Phase, PhaseKind, PhaseStatus, PlanPhases, RunOutcome};
