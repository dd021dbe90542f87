//! Wires the cron scheduler into the `CronSubsystem` trait seam so the
//! action executor can dispatch `cronCreate`/`cronUpdate`/`cronDelete`/
//! `cronList` (spec.md §4.4, §4.8).

use async_trait::async_trait;
use discoclaw_actions::handlers::{CronSubsystem, HandlerResult};
use serde_json::Value;

use crate::engine::SchedulerHandle;

/// Mutating operations against the forum-thread source of truth. Since the
/// chat service client is out of scope (spec.md §1), this crate only needs
/// this narrow write seam, implemented by the Discord adapter.
#[async_trait]
pub trait CronForumWriter: Send + Sync {
    async fn create_job_thread(&self, name: &str, schedule: &str, prompt: &str) -> Result<String, String>;
    async fn update_job_thread(&self, id: &str, schedule: Option<&str>, prompt: Option<&str>) -> Result<(), String>;
    async fn delete_job_thread(&self, id: &str) -> Result<(), String>;
}

pub struct CronHandler {
    handle: SchedulerHandle,
    writer: Box<dyn CronForumWriter>,
}

impl CronHandler {
    pub fn new(handle: SchedulerHandle, writer: Box<dyn CronForumWriter>) -> Self {
        Self { handle, writer }
    }
}

#[async_trait]
impl CronSubsystem for CronHandler {
    async fn dispatch(&self, action_type: &str, payload: &Value) -> HandlerResult {
        match action_type {
            "cronCreate" => {
                let (Some(name), Some(schedule), Some(prompt)) = (
                    payload.get("name").and_then(|v| v.as_str()),
                    payload.get("schedule").and_then(|v| v.as_str()),
                    payload.get("prompt").and_then(|v| v.as_str()),
                ) else {
                    return HandlerResult::err("cronCreate requires name, schedule, and prompt");
                };
                if let Err(e) = crate::schedule::parse(schedule) {
                    return HandlerResult::err(format!("invalid schedule: {e}"));
                }
                match self.writer.create_job_thread(name, schedule, prompt).await {
                    Ok(id) => HandlerResult::ok_with_data(
                        format!("Created cron job {name}"),
                        serde_json::json!({"id": id}),
                    ),
                    Err(e) => HandlerResult::err(e),
                }
            }
            "cronUpdate" => {
                let Some(id) = payload.get("id").and_then(|v| v.as_str()) else {
                    return HandlerResult::err("cronUpdate requires an id");
                };
                let schedule = payload.get("schedule").and_then(|v| v.as_str());
                if let Some(s) = schedule {
                    if let Err(e) = crate::schedule::parse(s) {
                        return HandlerResult::err(format!("invalid schedule: {e}"));
                    }
                }
                let prompt = payload.get("prompt").and_then(|v| v.as_str());
                match self.writer.update_job_thread(id, schedule, prompt).await {
                    Ok(()) => HandlerResult::ok(format!("Updated cron job {id}")),
                    Err(e) => HandlerResult::err(e),
                }
            }
            "cronDelete" => {
                let Some(id) = payload.get("id").and_then(|v| v.as_str()) else {
                    return HandlerResult::err("cronDelete requires an id");
                };
                match self.writer.delete_job_thread(id).await {
                    Ok(()) => HandlerResult::ok(format!("Deleted cron job {id}")),
                    Err(e) => HandlerResult::err(e),
                }
            }
            "cronList" => {
                let jobs = self.handle.list_jobs();
                let data = serde_json::json!(jobs
                    .iter()
                    .map(|j| serde_json::json!({
                        "id": j.id,
                        "name": j.name,
                        "schedule": j.schedule.to_source(),
                        "enabled": j.enabled,
                        "next_run_at": j.next_run_at,
                        "last_run_at": j.last_run_at,
                    }))
                    .collect::<Vec<_>>());
                HandlerResult::ok_with_data(format!("{} cron jobs", jobs.len()), data)
            }
            other => HandlerResult::err(format!("unhandled cron action: {other}")),
        }
    }
}
