//! Dispatches validated actions to subsystem handlers and renders a short
//! result list (§4.4).

use discoclaw_core::config::ActionsConfig;
use discoclaw_memory::{MemoryItem, MemoryKind, MemorySource, MemoryTier};
use discoclaw_tasks::{Task, TaskStatus};
use tracing::{info, warn};

use crate::catalog::{self, ActionCategory};
use crate::context::{ActionContext, SubsystemContexts};
use crate::handlers::HandlerResult;
use crate::parser::Action;

/// One executed (or skipped) action, ready for result-list rendering.
#[derive(Debug, Clone)]
pub struct ExecutedAction {
    pub action_type: String,
    pub category: Option<ActionCategory>,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Ok {
        summary: String,
        followup_eligible: bool,
        data: Option<serde_json::Value>,
    },
    Error {
        message: String,
    },
    /// Category disabled, or the category's subsystem handle wasn't supplied.
    Unavailable,
}

/// Execute every accepted action against `subsystems`, gated by `config`.
///
/// Unrecognized types never reach here (the parser already dropped them into
/// `stripped_unrecognized_types`); this only sees catalog-known types.
pub async fn execute_actions(
    actions: &[Action],
    ctx: &ActionContext,
    subsystems: &SubsystemContexts<'_>,
    config: &ActionsConfig,
) -> Vec<ExecutedAction> {
    let mut results = Vec::with_capacity(actions.len());
    for action in actions {
        results.push(execute_one(action, ctx, subsystems, config).await);
    }
    results
}

async fn execute_one(
    action: &Action,
    ctx: &ActionContext,
    subsystems: &SubsystemContexts<'_>,
    config: &ActionsConfig,
) -> ExecutedAction {
    let entry = match catalog::lookup(&action.action_type) {
        Some(e) => e,
        None => {
            // Should not happen (parser already filters), but fail closed.
            return ExecutedAction {
                action_type: action.action_type.clone(),
                category: None,
                outcome: ActionOutcome::Unavailable,
            };
        }
    };

    if !entry.category.enabled_in(config) {
        info!(action_type = %action.action_type, category = %entry.category, "action category disabled");
        return ExecutedAction {
            action_type: action.action_type.clone(),
            category: Some(entry.category),
            outcome: ActionOutcome::Unavailable,
        };
    }

    let result = dispatch(entry.category, action, ctx, subsystems).await;

    let outcome = match result {
        Some(HandlerResult { ok: true, summary, data, .. }) => ActionOutcome::Ok {
            summary,
            followup_eligible: entry.followup_eligible && data.is_some(),
            data,
        },
        Some(HandlerResult { ok: false, error, summary, .. }) => {
            ActionOutcome::Error { message: error.unwrap_or(summary) }
        }
        None => {
            warn!(action_type = %action.action_type, "no subsystem handle supplied for enabled category");
            ActionOutcome::Unavailable
        }
    };

    ExecutedAction {
        action_type: action.action_type.clone(),
        category: Some(entry.category),
        outcome,
    }
}

async fn dispatch(
    category: ActionCategory,
    action: &Action,
    ctx: &ActionContext,
    subsystems: &SubsystemContexts<'_>,
) -> Option<HandlerResult> {
    match category {
        ActionCategory::Channels
        | ActionCategory::Messaging
        | ActionCategory::Guild
        | ActionCategory::Moderation
        | ActionCategory::Polls
        | ActionCategory::BotProfile => {
            let handle = subsystems.chat_service?;
            Some(handle.dispatch(&action.action_type, &action.payload, ctx).await)
        }
        ActionCategory::Tasks => Some(dispatch_tasks(action, subsystems)),
        ActionCategory::Crons => {
            let handle = subsystems.cron?;
            Some(handle.dispatch(&action.action_type, &action.payload).await)
        }
        ActionCategory::Forge => {
            let handle = subsystems.forge?;
            Some(handle.dispatch(&action.action_type, &action.payload).await)
        }
        ActionCategory::Plan => {
            let handle = subsystems.plan?;
            Some(handle.dispatch(&action.action_type, &action.payload).await)
        }
        ActionCategory::Memory => Some(dispatch_memory(action, ctx, subsystems)),
        ActionCategory::Imagegen => {
            let handle = subsystems.imagegen?;
            Some(handle.dispatch(&action.action_type, &action.payload).await)
        }
        ActionCategory::Voice => {
            let handle = subsystems.voice?;
            Some(handle.dispatch(&action.action_type, &action.payload).await)
        }
        ActionCategory::Config => {
            let handle = subsystems.config?;
            Some(handle.dispatch(&action.action_type, &action.payload).await)
        }
        ActionCategory::Defer => {
            let handle = subsystems.defer?;
            Some(handle.dispatch(&action.action_type, &action.payload, ctx).await)
        }
    }
}

fn dispatch_tasks(action: &Action, subsystems: &SubsystemContexts<'_>) -> HandlerResult {
    let store = match subsystems.tasks {
        Some(s) => s,
        None => return HandlerResult::err("task store not available"),
    };
    match action.action_type.as_str() {
        "taskCreate" => {
            let title = match action.payload.get("title").and_then(|v| v.as_str()) {
                Some(t) => t,
                None => return HandlerResult::err("taskCreate requires a title"),
            };
            let description = action
                .payload
                .get("description")
                .and_then(|v| v.as_str())
                .map(String::from);
            let labels = action
                .payload
                .get("labels")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            match store.create(title, description, labels, None) {
                Ok(task) => HandlerResult::ok(format!("Created task {}", task.id)),
                Err(e) => HandlerResult::err(e.to_string()),
            }
        }
        "taskUpdate" => {
            let id = match action.payload.get("id").and_then(|v| v.as_str()) {
                Some(i) => i,
                None => return HandlerResult::err("taskUpdate requires an id"),
            };
            let title = action.payload.get("title").and_then(|v| v.as_str()).map(String::from);
            let description = action
                .payload
                .get("description")
                .and_then(|v| v.as_str())
                .map(String::from);
            match store.update(id, title, description, None) {
                Ok(task) => HandlerResult::ok(format!("Updated task {}", task.id)),
                Err(e) => HandlerResult::err(e.to_string()),
            }
        }
        "taskClose" => {
            let id = match action.payload.get("id").and_then(|v| v.as_str()) {
                Some(i) => i,
                None => return HandlerResult::err("taskClose requires an id"),
            };
            match store.set_status(id, TaskStatus::Closed) {
                Ok(task) => HandlerResult::ok(format!("Closed task {}", task.id)),
                Err(e) => HandlerResult::err(e.to_string()),
            }
        }
        "taskList" => {
            let tasks: Vec<Task> = store.list();
            let data = serde_json::to_value(&tasks).unwrap_or(serde_json::Value::Null);
            HandlerResult::ok_with_data(format!("{} task(s)", tasks.len()), data)
        }
        "taskGet" => {
            let id = match action.payload.get("id").and_then(|v| v.as_str()) {
                Some(i) => i,
                None => return HandlerResult::err("taskGet requires an id"),
            };
            match store.get(id) {
                Some(task) => {
                    let data = serde_json::to_value(&task).unwrap_or(serde_json::Value::Null);
                    HandlerResult::ok_with_data(format!("Task {id}"), data)
                }
                None => HandlerResult::err(format!("task not found: {id}")),
            }
        }
        other => HandlerResult::err(format!("unhandled task action: {other}")),
    }
}

fn dispatch_memory(
    action: &Action,
    ctx: &ActionContext,
    subsystems: &SubsystemContexts<'_>,
) -> HandlerResult {
    let manager = match subsystems.memory {
        Some(m) => m,
        None => return HandlerResult::err("memory manager not available"),
    };
    match action.action_type.as_str() {
        "memoryRemember" => {
            let text = match action.payload.get("text").and_then(|v| v.as_str()) {
                Some(t) => t,
                None => return HandlerResult::err("memoryRemember requires text"),
            };
            let tags = action
                .payload
                .get("tags")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            let source = MemorySource {
                source_type: "discord".to_string(),
                channel_id: Some(ctx.channel_id.clone()),
                message_id: Some(ctx.message_id.clone()),
                guild_id: ctx.guild_id.clone(),
                channel_name: None,
            };
            let item = MemoryItem::new(MemoryKind::Fact, text, source).with_tags(tags);
            match manager.append(MemoryTier::Durable, &ctx.user_id, item) {
                Ok(()) => HandlerResult::ok("Remembered"),
                Err(e) => HandlerResult::err(e.to_string()),
            }
        }
        "memoryForget" => {
            let id = match action.payload.get("id").and_then(|v| v.as_str()) {
                Some(i) => i,
                None => return HandlerResult::err("memoryForget requires an id"),
            };
            match manager.forget(MemoryTier::Durable, &ctx.user_id, id) {
                Ok(()) => HandlerResult::ok("Forgotten"),
                Err(e) => HandlerResult::err(e.to_string()),
            }
        }
        "memoryRecall" => {
            let items = manager.list(MemoryTier::Durable, &ctx.user_id);
            let data = serde_json::to_value(&items).unwrap_or(serde_json::Value::Null);
            HandlerResult::ok_with_data(format!("{} memory item(s)", items.len()), data)
        }
        other => HandlerResult::err(format!("unhandled memory action: {other}")),
    }
}

/// Render executed actions as a short list appended to outgoing text.
///
/// A `sendMessage` "Done" line is suppressed — the message itself already is
/// the evidence of success.
pub fn render_results(executed: &[ExecutedAction]) -> String {
    let mut lines = Vec::new();
    for e in executed {
        if e.action_type == "sendMessage" {
            if let ActionOutcome::Ok { .. } = e.outcome {
                continue;
            }
        }
        let line = match &e.outcome {
            ActionOutcome::Ok { summary, .. } => format!("✓ {}: {}", e.action_type, summary),
            ActionOutcome::Error { message } => format!("✗ {}: {}", e.action_type, message),
            ActionOutcome::Unavailable => format!("– {}: unavailable", e.action_type),
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Whether any executed action carries follow-up-eligible structured data.
pub fn has_followup_eligible(executed: &[ExecutedAction]) -> bool {
    executed
        .iter()
        .any(|e| matches!(&e.outcome, ActionOutcome::Ok { followup_eligible: true, .. }))
}

/// Build the `"[Auto-follow-up]"` prompt block from eligible results.
pub fn render_followup_prompt(executed: &[ExecutedAction]) -> Option<String> {
    let mut blocks = Vec::new();
    for e in executed {
        if let ActionOutcome::Ok { followup_eligible: true, data: Some(data), .. } = &e.outcome {
            blocks.push(format!(
                "### {}\n```json\n{}\n```",
                e.action_type,
                serde_json::to_string_pretty(data).unwrap_or_default()
            ));
        }
    }
    if blocks.is_empty() {
        None
    } else {
        Some(format!("[Auto-follow-up]\n{}", blocks.join("\n\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConfirmationMode;
    use crate::parser::parse_actions;

    fn ctx() -> ActionContext {
        ActionContext {
            guild_id: None,
            channel_id: "chan".into(),
            message_id: "msg".into(),
            thread_parent_id: None,
            confirmation_mode: ConfirmationMode::Automated,
            user_id: "user-1".into(),
        }
    }

    #[tokio::test]
    async fn task_list_is_followup_eligible_and_carries_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = discoclaw_tasks::TaskStore::load(dir.path().join("tasks.jsonl"));
        store.create("do the thing", None, vec![], None).unwrap();

        let parsed = parse_actions(r#"<discord-action>{"type":"taskList"}</discord-action>"#);
        let subsystems = SubsystemContexts {
            tasks: Some(&store),
            ..Default::default()
        };
        let config = ActionsConfig::default();
        let executed = execute_actions(&parsed.actions, &ctx(), &subsystems, &config).await;
        assert_eq!(executed.len(), 1);
        assert!(has_followup_eligible(&executed));
        assert!(render_followup_prompt(&executed).unwrap().contains("[Auto-follow-up]"));
    }

    #[tokio::test]
    async fn disabled_category_is_unavailable() {
        let parsed = parse_actions(r#"<discord-action>{"type":"kickUser"}</discord-action>"#);
        let subsystems = SubsystemContexts::default();
        let mut config = ActionsConfig::default();
        config.moderation = false;
        let executed = execute_actions(&parsed.actions, &ctx(), &subsystems, &config).await;
        assert!(matches!(executed[0].outcome, ActionOutcome::Unavailable));
    }

    #[tokio::test]
    async fn send_message_success_is_suppressed_in_render() {
        struct Ok;
        #[async_trait::async_trait]
        impl crate::handlers::ChatServiceSubsystem for Ok {
            async fn dispatch(
                &self,
                _action_type: &str,
                _payload: &serde_json::Value,
                _ctx: &ActionContext,
            ) -> HandlerResult {
                HandlerResult::ok("Done")
            }
        }
        let handle = Ok;
        let parsed = parse_actions(r#"<discord-action>{"type":"sendMessage","text":"hi"}</discord-action>"#);
        let subsystems = SubsystemContexts {
            chat_service: Some(&handle),
            ..Default::default()
        };
        let config = ActionsConfig::default();
        let executed = execute_actions(&parsed.actions, &ctx(), &subsystems, &config).await;
        assert_eq!(render_results(&executed), "");
    }
}
