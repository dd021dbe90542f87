//! Per-invocation context passed to every action handler.

use discoclaw_memory::MemoryManager;
use discoclaw_tasks::TaskStore;

use crate::handlers::{
    ChatServiceSubsystem, ConfigSubsystem, CronSubsystem, DeferSubsystem, ForgeSubsystem,
    ImagegenSubsystem, PlanSubsystem, VoiceSubsystem,
};

/// Whether the action was authored directly by a human (slash command,
/// reaction) or emitted automatically by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationMode {
    UserConfirmed,
    Automated,
}

/// Shared per-call identity the action executor passes to every handler.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub message_id: String,
    pub thread_parent_id: Option<String>,
    pub confirmation_mode: ConfirmationMode,
    /// The allowlisted user id the triggering message came from.
    pub user_id: String,
}

/// The subsystem handles an action executor may call into. Any field may be
/// absent (e.g. the cron scheduler is never wired into a slash-command-only
/// invocation context); an action whose category has no backing handle is
/// treated the same as a category-disabled action.
///
/// Built fresh per invocation by the caller (the message pipeline, the forge
/// orchestrator, …) from whatever subsystems it actually holds — no
/// long-lived cross-subsystem references are stored here (§9).
pub struct SubsystemContexts<'a> {
    pub tasks: Option<&'a TaskStore>,
    pub memory: Option<&'a MemoryManager>,
    pub chat_service: Option<&'a dyn ChatServiceSubsystem>,
    pub cron: Option<&'a dyn CronSubsystem>,
    pub forge: Option<&'a dyn ForgeSubsystem>,
    pub plan: Option<&'a dyn PlanSubsystem>,
    pub imagegen: Option<&'a dyn ImagegenSubsystem>,
    pub voice: Option<&'a dyn VoiceSubsystem>,
    pub config: Option<&'a dyn ConfigSubsystem>,
    pub defer: Option<&'a dyn DeferSubsystem>,
}

impl<'a> Default for SubsystemContexts<'a> {
    fn default() -> Self {
        Self {
            tasks: None,
            memory: None,
            chat_service: None,
            cron: None,
            forge: None,
            plan: None,
            imagegen: None,
            voice: None,
            config: None,
            defer: None,
        }
    }
}
