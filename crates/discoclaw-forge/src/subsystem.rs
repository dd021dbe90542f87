//! Wires `ForgeOrchestrator` into the `ForgeSubsystem` trait seam so the
//! action executor can dispatch `forgeRun`/`forgeResume`/`forgeCancel`
//! without this crate depending back on `discoclaw-actions` for anything
//! but the trait definition.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use discoclaw_actions::handlers::{ForgeSubsystem, HandlerResult};
use serde_json::Value;

use crate::orchestrator::ForgeOrchestrator;

pub struct ForgeHandler {
    orchestrator: Arc<ForgeOrchestrator>,
}

impl ForgeHandler {
    pub fn new(orchestrator: Arc<ForgeOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ForgeSubsystem for ForgeHandler {
    async fn dispatch(&self, action_type: &str, payload: &Value) -> HandlerResult {
        match action_type {
            "forgeRun" => {
                let description = match payload.get("description").and_then(|v| v.as_str()) {
                    Some(d) => d,
                    None => return HandlerResult::err("forgeRun requires a description"),
                };
                let existing_task_id = payload.get("task_id").and_then(|v| v.as_str());
                let context = payload.get("context").and_then(|v| v.as_str());
                let project_context = payload.get("project_context").and_then(|v| v.as_str());

                match self
                    .orchestrator
                    .run(description, existing_task_id, context, project_context, None)
                    .await
                {
                    Ok(result) => {
                        let data = serde_json::json!({
                            "plan_id": result.plan_id,
                            "file_path": result.file_path.to_string_lossy(),
                            "rounds": result.rounds,
                            "reached_max_rounds": result.reached_max_rounds,
                            "final_verdict": result.final_verdict.as_str(),
                        });
                        HandlerResult::ok_with_data(format!("Forge run produced {}", result.plan_id), data)
                    }
                    Err(e) => HandlerResult::err(e.to_string()),
                }
            }
            "forgeResume" => {
                let plan_id = match payload.get("plan_id").and_then(|v| v.as_str()) {
                    Some(p) => p,
                    None => return HandlerResult::err("forgeResume requires a plan_id"),
                };
                let file_path = match payload.get("file_path").and_then(|v| v.as_str()) {
                    Some(p) => PathBuf::from(p),
                    None => return HandlerResult::err("forgeResume requires a file_path"),
                };
                let title = payload.get("title").and_then(|v| v.as_str()).unwrap_or(plan_id);
                let project_context = payload.get("project_context").and_then(|v| v.as_str());

                match self
                    .orchestrator
                    .resume(plan_id, &file_path, title, project_context, None)
                    .await
                {
                    Ok(result) => {
                        let data = serde_json::json!({
                            "plan_id": result.plan_id,
                            "rounds": result.rounds,
                            "reached_max_rounds": result.reached_max_rounds,
                            "final_verdict": result.final_verdict.as_str(),
                        });
                        HandlerResult::ok_with_data(format!("Forge resumed {}", result.plan_id), data)
                    }
                    Err(e) => HandlerResult::err(e.to_string()),
                }
            }
            "forgeCancel" => {
                self.orchestrator.request_cancel();
                HandlerResult::ok("Cancellation requested; forge will stop at the next round boundary")
            }
            other => HandlerResult::err(format!("unhandled forge action: {other}")),
        }
    }
}
