//! Bundles the subsystem trait objects a running process actually holds.
//! Built once at startup by the binary crate and handed to the pipeline;
//! rebuilt into a borrowed [`SubsystemContexts`] fresh for each invocation
//! so no handler ever outlives the call that needs it (spec §9).

use std::sync::Arc;

use discoclaw_actions::context::SubsystemContexts;
use discoclaw_actions::handlers::{
    ChatServiceSubsystem, ConfigSubsystem, CronSubsystem, DeferSubsystem, ForgeSubsystem,
    ImagegenSubsystem, PlanSubsystem, VoiceSubsystem,
};
use discoclaw_memory::MemoryManager;
use discoclaw_tasks::TaskStore;

#[derive(Clone, Default)]
pub struct Subsystems {
    pub tasks: Option<Arc<TaskStore>>,
    pub memory: Option<Arc<MemoryManager>>,
    pub chat_service: Option<Arc<dyn ChatServiceSubsystem>>,
    pub cron: Option<Arc<dyn CronSubsystem>>,
    pub forge: Option<Arc<dyn ForgeSubsystem>>,
    pub plan: Option<Arc<dyn PlanSubsystem>>,
    pub imagegen: Option<Arc<dyn ImagegenSubsystem>>,
    pub voice: Option<Arc<dyn VoiceSubsystem>>,
    pub config: Option<Arc<dyn ConfigSubsystem>>,
    pub defer: Option<Arc<dyn DeferSubsystem>>,
}

impl Subsystems {
    pub fn as_contexts(&self) -> SubsystemContexts<'_> {
        SubsystemContexts {
            tasks: self.tasks.as_deref(),
            memory: self.memory.as_deref(),
            chat_service: self.chat_service.as_deref(),
            cron: self.cron.as_deref(),
            forge: self.forge.as_deref(),
            plan: self.plan.as_deref(),
            imagegen: self.imagegen.as_deref(),
            voice: self.voice.as_deref(),
            config: self.config.as_deref(),
            defer: self.defer.as_deref(),
        }
    }
}
