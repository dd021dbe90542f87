//! Drafter/auditor plan-forging loop (spec.md §4.6). Produces plan markdown
//! files on disk and a dedicated backing task, cooperating with
//! `discoclaw-tasks` and driven through `discoclaw-runtime`.

pub mod error;
pub mod orchestrator;
pub mod subsystem;
pub mod template;
pub mod types;
pub mod verdict;

pub use error::{ForgeError, Result};
pub use orchestrator::ForgeOrchestrator;
pub use subsystem::ForgeHandler;
pub use types::{FinalVerdict, ForgeProgress, ForgeRunResult, ProgressCallback};
