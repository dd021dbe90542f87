//! Trait seams the action executor dispatches through. Concrete
//! implementations live in the subsystem crates (`discoclaw-forge`,
//! `discoclaw-plan`, `discoclaw-cron`, …); this crate only defines the
//! contract so none of them need to depend on each other.

use async_trait::async_trait;
use serde_json::Value;

/// Outcome of a single handler call, independent of category.
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub ok: bool,
    pub summary: String,
    /// Present when `ok` is false.
    pub error: Option<String>,
    /// Structured data worth echoing back to the model in a follow-up prompt.
    pub data: Option<Value>,
}

impl HandlerResult {
    pub fn ok(summary: impl Into<String>) -> Self {
        Self {
            ok: true,
            summary: summary.into(),
            error: None,
            data: None,
        }
    }

    pub fn ok_with_data(summary: impl Into<String>, data: Value) -> Self {
        Self {
            ok: true,
            summary: summary.into(),
            error: None,
            data: Some(data),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            ok: false,
            summary: message.clone(),
            error: Some(message),
            data: None,
        }
    }
}

/// Chat-service verbs: `channels`, `messaging`, `guild`, `moderation`,
/// `polls`, `bot_profile`. One trait because they all reduce to "call the
/// chat service client with these parameters" — the client itself is an
/// external collaborator (spec.md §1 Non-goals).
#[async_trait]
pub trait ChatServiceSubsystem: Send + Sync {
    async fn dispatch(&self, action_type: &str, payload: &Value, ctx: &crate::ActionContext) -> HandlerResult;
}

#[async_trait]
pub trait CronSubsystem: Send + Sync {
    async fn dispatch(&self, action_type: &str, payload: &Value) -> HandlerResult;
}

#[async_trait]
pub trait ForgeSubsystem: Send + Sync {
    async fn dispatch(&self, action_type: &str, payload: &Value) -> HandlerResult;
}

#[async_trait]
pub trait PlanSubsystem: Send + Sync {
    async fn dispatch(&self, action_type: &str, payload: &Value) -> HandlerResult;
}

#[async_trait]
pub trait ImagegenSubsystem: Send + Sync {
    async fn dispatch(&self, action_type: &str, payload: &Value) -> HandlerResult;
}

#[async_trait]
pub trait VoiceSubsystem: Send + Sync {
    async fn dispatch(&self, action_type: &str, payload: &Value) -> HandlerResult;
}

#[async_trait]
pub trait ConfigSubsystem: Send + Sync {
    async fn dispatch(&self, action_type: &str, payload: &Value) -> HandlerResult;
}

#[async_trait]
pub trait DeferSubsystem: Send + Sync {
    async fn dispatch(&self, action_type: &str, payload: &Value, ctx: &crate::ActionContext) -> HandlerResult;
}
