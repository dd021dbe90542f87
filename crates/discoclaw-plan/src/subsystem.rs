//! Wires `PlanManager` into the `PlanSubsystem` trait seam so the action
//! executor can dispatch `planPhasesRun`/`planPhasesStatus`/
//! `planPhasesRegenerate` without this crate depending back on
//! `discoclaw-actions` for anything but the trait definition.

use std::sync::Arc;

use async_trait::async_trait;
use discoclaw_actions::handlers::{HandlerResult, PlanSubsystem};
use serde_json::Value;

use crate::decompose::decompose;
use crate::manager::PlanManager;
use crate::persistence;
use crate::types::RunOutcome;

pub struct PlanHandler {
    manager: Arc<PlanManager>,
    plans_dir: std::path::PathBuf,
    workspace_root: std::path::PathBuf,
}

impl PlanHandler {
    pub fn new(manager: Arc<PlanManager>, plans_dir: std::path::PathBuf, workspace_root: std::path::PathBuf) -> Self {
        Self {
            manager,
            plans_dir,
            workspace_root,
        }
    }

    fn regenerate(&self, plan_id: &str) -> HandlerResult {
        let plan_files: Vec<_> = std::fs::read_dir(&self.workspace_root.join("plans"))
            .into_iter()
            .flatten()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(&format!("{plan_id}-")))
            .collect();
        let Some(entry) = plan_files.into_iter().find(|e| e.file_name().to_string_lossy().ends_with(".md")) else {
            return HandlerResult::err(format!("no plan file found for {plan_id}"));
        };
        let plan_file_path = entry.path();
        let content = match std::fs::read_to_string(&plan_file_path) {
            Ok(c) => c,
            Err(e) => return HandlerResult::err(format!("could not read plan file: {e}")),
        };
        let relative = plan_file_path
            .strip_prefix(&self.workspace_root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| plan_file_path.to_string_lossy().to_string());
        let phases = decompose(&content, plan_id, &relative, self.manager.max_context_files());
        match persistence::save(&self.plans_dir, &phases) {
            Ok(()) => HandlerResult::ok_with_data(
                format!("Regenerated {} phases for {plan_id}", phases.phases.len()),
                serde_json::json!({"plan_id": plan_id, "phase_count": phases.phases.len()}),
            ),
            Err(e) => HandlerResult::err(e.to_string()),
        }
    }

    fn status(&self, plan_id: &str) -> HandlerResult {
        match persistence::load(&self.plans_dir, plan_id) {
            Ok(phases) => {
                let data = serde_json::json!({
                    "plan_id": phases.plan_id,
                    "phases": phases.phases.iter().map(|p| serde_json::json!({
                        "id": p.id,
                        "title": p.title,
                        "kind": p.kind.as_str(),
                        "status": p.status.as_str(),
                    })).collect::<Vec<_>>(),
                });
                HandlerResult::ok_with_data(format!("{} has {} phases", plan_id, phases.phases.len()), data)
            }
            Err(e) => HandlerResult::err(e.to_string()),
        }
    }
}

#[async_trait]
impl PlanSubsystem for PlanHandler {
    async fn dispatch(&self, action_type: &str, payload: &Value) -> HandlerResult {
        let plan_id = match payload.get("plan_id").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return HandlerResult::err(format!("{action_type} requires a plan_id")),
        };
        match action_type {
            "planPhasesRun" => match self.manager.run_next_phase(&plan_id).await {
                Ok(RunOutcome::NothingToRun) => HandlerResult::ok(format!("{plan_id}: nothing to run")),
                Ok(RunOutcome::Stale { message }) => HandlerResult::err(message),
                Ok(RunOutcome::RetryBlocked { phase_id, message }) => {
                    HandlerResult::err(format!("{phase_id}: {message}"))
                }
                Ok(RunOutcome::Done { phase_id }) => {
                    HandlerResult::ok_with_data(format!("{phase_id} done"), serde_json::json!({"phase_id": phase_id, "status": "done"}))
                }
                Ok(RunOutcome::AuditFailed { phase_id, max_severity }) => HandlerResult::err(format!(
                    "{phase_id}: audit found {max_severity} severity concerns"
                )),
                Ok(RunOutcome::Failed { phase_id, message }) => HandlerResult::err(format!("{phase_id}: {message}")),
                Err(e) => HandlerResult::err(e.to_string()),
            },
            "planPhasesStatus" => self.status(&plan_id),
            "planPhasesRegenerate" => self.regenerate(&plan_id),
            other => HandlerResult::err(format!("unhandled plan action: {other}")),
        }
    }
}
