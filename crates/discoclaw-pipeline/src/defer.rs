//! The defer scheduler (spec §4.9): lets a model response enqueue a future
//! re-invocation with the same effective context.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discoclaw_actions::context::ActionContext;
use discoclaw_actions::handlers::{DeferSubsystem, HandlerResult};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::warn;

/// Invoked at fire time with the target channel and the prompt to run.
/// Implemented by whatever wires the pipeline into a concrete invocation
/// path (typically re-entering `MessagePipeline`).
#[async_trait]
pub trait DeferHandler: Send + Sync {
    async fn fire(&self, channel_id: &str, prompt: &str);
}

pub struct DeferScheduler {
    max_delay: Duration,
    concurrency: Arc<Semaphore>,
    handler: Arc<dyn DeferHandler>,
}

impl DeferScheduler {
    pub fn new(max_delay_seconds: u64, max_concurrent: usize, handler: Arc<dyn DeferHandler>) -> Self {
        Self {
            max_delay: Duration::from_secs(max_delay_seconds),
            concurrency: Arc::new(Semaphore::new(max_concurrent)),
            handler,
        }
    }

    /// Validate the delay bound, acquire a concurrency slot, and spawn the
    /// delayed fire. Returns immediately; the slot is released once the
    /// handler returns.
    pub fn schedule(&self, channel_id: String, prompt: String, fires_at: DateTime<Utc>) -> Result<(), String> {
        let delay = (fires_at - Utc::now())
            .to_std()
            .map_err(|_| "fires_at must be in the future".to_string())?;
        if delay > self.max_delay {
            return Err(format!(
                "delay of {}s exceeds the maximum of {}s",
                delay.as_secs(),
                self.max_delay.as_secs()
            ));
        }

        let permit = match Arc::clone(&self.concurrency).try_acquire_owned() {
            Ok(p) => p,
            Err(_) => return Err("too many deferred invocations already scheduled".to_string()),
        };

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handler.fire(&channel_id, &prompt).await;
            drop(permit);
        });
        Ok(())
    }
}

#[async_trait]
impl DeferSubsystem for DeferScheduler {
    async fn dispatch(&self, action_type: &str, payload: &Value, ctx: &ActionContext) -> HandlerResult {
        if action_type != "defer" {
            return HandlerResult::err(format!("unhandled defer action: {action_type}"));
        }

        let Some(prompt) = payload.get("prompt").and_then(|v| v.as_str()) else {
            return HandlerResult::err("defer requires a prompt");
        };
        let channel_id = payload
            .get("channel_id")
            .and_then(|v| v.as_str())
            .unwrap_or(&ctx.channel_id)
            .to_string();
        let Some(delay_secs) = payload.get("fires_in_seconds").and_then(|v| v.as_u64()) else {
            return HandlerResult::err("defer requires fires_in_seconds");
        };

        let fires_at = Utc::now() + chrono::Duration::seconds(delay_secs as i64);
        match self.schedule(channel_id, prompt.to_string(), fires_at) {
            Ok(()) => HandlerResult::ok(format!("Scheduled to run in {delay_secs}s")),
            Err(e) => {
                warn!(error = %e, "defer schedule rejected");
                HandlerResult::err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        fired: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DeferHandler for CountingHandler {
        async fn fire(&self, _channel_id: &str, _prompt: &str) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ctx() -> ActionContext {
        ActionContext {
            guild_id: None,
            channel_id: "c1".into(),
            message_id: "m1".into(),
            thread_parent_id: None,
            confirmation_mode: discoclaw_actions::context::ConfirmationMode::Automated,
            user_id: "u1".into(),
        }
    }

    #[tokio::test]
    async fn schedule_beyond_max_delay_is_rejected() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = DeferScheduler::new(60, 5, Arc::new(CountingHandler { fired }));
        let fires_at = Utc::now() + chrono::Duration::seconds(3600);
        assert!(scheduler.schedule("c1".into(), "hi".into(), fires_at).is_err());
    }

    #[tokio::test]
    async fn schedule_fires_handler_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = DeferScheduler::new(60, 5, Arc::new(CountingHandler { fired: Arc::clone(&fired) }));
        let fires_at = Utc::now() + chrono::Duration::milliseconds(50);
        scheduler.schedule("c1".into(), "hi".into(), fires_at).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_limit_rejects_excess_schedules() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = DeferScheduler::new(60, 1, Arc::new(CountingHandler { fired }));
        let fires_at = Utc::now() + chrono::Duration::seconds(30);
        assert!(scheduler.schedule("c1".into(), "first".into(), fires_at).is_ok());
        assert!(scheduler.schedule("c1".into(), "second".into(), fires_at).is_err());
    }

    #[tokio::test]
    async fn dispatch_requires_prompt_and_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = DeferScheduler::new(60, 5, Arc::new(CountingHandler { fired }));
        let result = scheduler.dispatch("defer", &serde_json::json!({}), &ctx()).await;
        assert!(!result.ok);
    }
}
