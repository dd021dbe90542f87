//! `shutdown-context.json` (spec.md §9): a small marker the process writes
//! on a clean shutdown and consumes on the next boot, so a restart can note
//! which channel it last handled traffic in.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
pub struct ShutdownContext {
    pub channel_id: String,
    pub shut_down_at: chrono::DateTime<chrono::Utc>,
}

/// Read and remove the shutdown-context marker left by a prior clean exit,
/// if one exists. A missing or corrupt file is not an error — this is
/// best-effort continuity, not required state.
pub fn consume_shutdown_context(path: &Path) -> Option<ShutdownContext> {
    let content = std::fs::read_to_string(path).ok()?;
    let parsed = match serde_json::from_str(&content) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            warn!(error = %e, "corrupt shutdown-context.json, ignoring");
            None
        }
    };
    let _ = std::fs::remove_file(path);
    parsed
}

/// Write a placeholder marker on clean shutdown. Which channel this refers
/// to isn't tracked anywhere yet (no single "last active channel" concept
/// exists in the pipeline); left empty until that's threaded through.
pub fn write_shutdown_context(path: &Path) {
    let ctx = ShutdownContext {
        channel_id: String::new(),
        shut_down_at: chrono::Utc::now(),
    };
    match serde_json::to_string_pretty(&ctx) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!(error = %e, "failed to write shutdown-context.json");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize shutdown context"),
    }
}
