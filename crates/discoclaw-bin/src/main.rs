//! Process entry point: load config, build every subsystem, connect to
//! Discord, and run until shutdown (spec.md §9).

mod lock;
mod shutdown;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serenity::http::Http;
use tokio::sync::watch;
use tracing::{error, info, warn};

use discoclaw_actions::handlers::{ChatServiceSubsystem, CronSubsystem, DeferSubsystem, ForgeSubsystem, PlanSubsystem};
use discoclaw_core::config::{DiscoclawConfig, RuntimeId};
use discoclaw_core::error::DiscoclawError;
use discoclaw_cron::{CronForumSource, CronHandler, CronRegistry, RunStatsStore, SchedulerEngine, SyncCoordinator};
use discoclaw_discord::{CronForumChannel, DiscordAdapter, DiscordChatAdapter};
use discoclaw_forge::{ForgeHandler, ForgeOrchestrator};
use discoclaw_inflight::{ChatService, InFlightRegistry};
use discoclaw_memory::MemoryManager;
use discoclaw_pipeline::{
    ChannelContext, ChatAdapter, DeferHandler, DeferScheduler, IncomingMessage, MessagePipeline,
    PersonaFiles, PipelineDeps, Subsystems,
};
use discoclaw_plan::{PlanHandler, PlanManager};
use discoclaw_runtime::{
    ClaudeCliAdapter, CodexCliAdapter, GeminiCliAdapter, OpenAiCompatAdapter, RuntimeRegistry,
};
use discoclaw_session::SessionManager;
use discoclaw_tasks::TaskStore;

use discoclaw_discord::commands::SlashDeps;

/// Re-enters the pipeline for a fired deferred invocation, as the bot's own
/// trusted voice rather than a real Discord author.
///
/// `DeferScheduler` is built before `MessagePipeline` exists (the pipeline
/// needs a `Subsystems` bundle that includes the scheduler itself), so the
/// pipeline handle is filled in once, right after construction.
struct PipelineDeferHandler {
    pipeline: OnceLock<Arc<MessagePipeline>>,
}

impl PipelineDeferHandler {
    fn new() -> Self {
        Self { pipeline: OnceLock::new() }
    }

    fn set_pipeline(&self, pipeline: Arc<MessagePipeline>) {
        let _ = self.pipeline.set(pipeline);
    }
}

#[async_trait::async_trait]
impl DeferHandler for PipelineDeferHandler {
    async fn fire(&self, channel_id: &str, prompt: &str) {
        let Some(pipeline) = self.pipeline.get() else {
            warn!("deferred invocation fired before the pipeline was ready");
            return;
        };
        let incoming = IncomingMessage {
            guild_id: None,
            channel_id: channel_id.to_string(),
            message_id: format!("defer-{}", uuid_stub()),
            thread_parent_id: None,
            user_id: "discoclaw-defer".to_string(),
            from_trusted_bot: true,
            text: prompt.to_string(),
            images: Vec::new(),
            attachment_texts: Vec::new(),
            attachment_notes: Vec::new(),
        };
        pipeline.handle_message(incoming);
    }
}

/// A short unique-enough suffix for synthetic message ids; deferred fires
/// don't need global uniqueness, just distinctness within a run.
fn uuid_stub() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "discoclaw=info".into()),
        )
        .init();

    let config_path = std::env::var("DISCOCLAW_CONFIG").ok();
    let config = DiscoclawConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        DiscoclawConfig::default()
    });

    let data_root = config.data.root_path();
    std::fs::create_dir_all(&data_root)?;
    std::fs::create_dir_all(config.data.channel_context_dir())?;
    std::fs::create_dir_all(config.data.cron_dir())?;
    std::fs::create_dir_all(config.data.tasks_dir())?;
    std::fs::create_dir_all(config.data.plans_dir())?;

    let _lock = lock::PidLock::acquire(config.data.pid_lock_dir())
        .map_err(|e| DiscoclawError::Config(format!("another instance is already running: {e}")))?;

    let persona = Arc::new(PersonaFiles::new(config.data.workspace_root()));
    persona
        .verify_required()
        .map_err(|e| DiscoclawError::Config(format!("persona context: {e}")))?;

    if let Some(resume) = shutdown::consume_shutdown_context(&config.data.shutdown_context_file()) {
        info!(channel_id = %resume.channel_id, "resuming after graceful shutdown");
    }

    let runtime = Arc::new(build_runtime_registry(&config));
    let sessions = Arc::new(SessionManager::load(config.data.sessions_file()));
    let inflight = Arc::new(InFlightRegistry::load(config.data.inflight_file()));
    let memory = Arc::new(MemoryManager::new(config.data.memory_root()));
    let tasks = Arc::new(TaskStore::load(config.data.tasks_dir().join("tasks.jsonl")));
    let channel_context = Arc::new(ChannelContext::new(data_root.clone()));

    let bot_token = config
        .discord
        .bot_token
        .clone()
        .ok_or_else(|| DiscoclawError::Config("discord.bot_token is required".to_string()))?;
    let http = Arc::new(Http::new(&bot_token));
    let chat = Arc::new(DiscordChatAdapter::new(Arc::clone(&http), config.discord.ack_reactions));

    let forge_orchestrator = Arc::new(ForgeOrchestrator::new(
        Arc::clone(&runtime),
        config.runtime.primary_runtime,
        Arc::clone(&tasks),
        config.data.plans_dir(),
        config.data.workspace_root(),
        config.forge.drafter_model.clone(),
        config.forge.auditor_model.clone(),
        config.forge.max_audit_rounds,
    ));
    let forge_handler: Option<Arc<dyn ForgeSubsystem>> = if config.actions.forge {
        Some(Arc::new(ForgeHandler::new(Arc::clone(&forge_orchestrator))))
    } else {
        None
    };

    let plan_manager = Arc::new(PlanManager::new(
        Arc::clone(&runtime),
        config.runtime.primary_runtime,
        Arc::clone(&tasks),
        config.data.workspace_root(),
        config.data.plans_dir(),
        config.runtime.model.clone(),
        config.plan.audit_fix_max,
        config.plan.max_context_files,
    ));
    let plan_handler: Option<Arc<dyn PlanSubsystem>> = if config.actions.plan {
        Some(Arc::new(PlanHandler::new(
            Arc::clone(&plan_manager),
            config.data.plans_dir(),
            config.data.workspace_root(),
        )))
    } else {
        None
    };

    let cron_forum_channel_id = config
        .cron
        .forum_channel_id
        .as_ref()
        .and_then(|id| id.parse::<u64>().ok());

    let (cron_subsystem, cron_shutdown_tx) = if config.actions.crons {
        if let Some(forum_channel_id) = cron_forum_channel_id {
            let forum = Arc::new(CronForumChannel::new(
                Arc::clone(&http),
                serenity::model::id::ChannelId::new(forum_channel_id),
            ));
            let cron_registry = Arc::new(CronRegistry::new(config.cron.jitter_secs));
            let stats = Arc::new(RunStatsStore::load(config.data.cron_dir().join("cron-run-stats.json")));
            let engine = Arc::new(SchedulerEngine::new(
                Arc::clone(&cron_registry),
                Arc::clone(&runtime),
                config.runtime.primary_runtime,
                config.runtime.model.clone(),
                Arc::clone(&stats),
                config.data.cron_dir().join("locks"),
                config.cron.tick_secs,
                config.cron.heartbeat_secs,
                Duration::from_millis(config.runtime.timeout_ms),
            ));

            let _sync = SyncCoordinator::spawn(
                Arc::clone(&cron_registry),
                forum.clone() as Arc<dyn CronForumSource>,
                Duration::from_secs(5),
            );

            let (tx, rx) = watch::channel(false);
            let sink = Arc::clone(&chat) as Arc<dyn discoclaw_cron::CronSink>;
            let engine_run = Arc::clone(&engine);
            tokio::spawn(async move {
                engine_run.run(sink, rx).await;
            });

            let handler = CronHandler::new(engine.handle(), Box::new(CronForumChannelWriter(forum)));
            (Some(Arc::new(handler) as Arc<dyn CronSubsystem>), Some(tx))
        } else {
            warn!("cron.forum_channel_id not set; cron subsystem disabled");
            (None, None)
        }
    } else {
        (None, None)
    };

    let defer_handler = Arc::new(PipelineDeferHandler::new());
    let defer_scheduler = if config.actions.defer {
        Some(Arc::new(DeferScheduler::new(
            config.defer.max_delay_seconds,
            config.defer.max_concurrent,
            Arc::clone(&defer_handler) as Arc<dyn DeferHandler>,
        )))
    } else {
        None
    };

    let subsystems = Subsystems {
        tasks: if config.actions.tasks { Some(Arc::clone(&tasks)) } else { None },
        memory: if config.actions.memory { Some(Arc::clone(&memory)) } else { None },
        chat_service: if config.actions.channels || config.actions.messaging || config.actions.guild || config.actions.moderation || config.actions.polls || config.actions.bot_profile {
            Some(Arc::clone(&chat) as Arc<dyn ChatServiceSubsystem>)
        } else {
            None
        },
        cron: cron_subsystem,
        forge: forge_handler,
        plan: plan_handler,
        imagegen: None,
        voice: None,
        config: None,
        defer: defer_scheduler.clone().map(|s| s as Arc<dyn DeferSubsystem>),
    };

    let deps = PipelineDeps {
        runtime: Arc::clone(&runtime),
        runtime_config: config.runtime.clone(),
        discord_config: config.discord.clone(),
        actions_config: config.actions.clone(),
        context_config: config.context.clone(),
        inflight: Arc::clone(&inflight),
        memory: Arc::clone(&memory),
        persona: Arc::clone(&persona),
        channel_context: Arc::clone(&channel_context),
        chat: Arc::clone(&chat) as Arc<dyn ChatAdapter>,
        subsystems,
    };
    let pipeline = Arc::new(MessagePipeline::new(deps));
    defer_handler.set_pipeline(Arc::clone(&pipeline));

    inflight.cleanup_orphans(chat.as_ref() as &dyn ChatService).await;

    let slash = SlashDeps {
        pipeline: Arc::clone(&pipeline),
        runtime: Arc::clone(&runtime),
        sessions: Arc::clone(&sessions),
        memory: Arc::clone(&memory),
        default_runtime: config.runtime.primary_runtime,
        default_model: config.runtime.model.clone(),
        use_runtime_sessions: config.runtime.use_runtime_sessions,
    };

    let adapter = DiscordAdapter::new(&config.discord, Arc::clone(&pipeline), slash);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = adapter.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }

    if let Some(tx) = cron_shutdown_tx {
        let _ = tx.send(true);
    }

    let drained = inflight
        .drain(Duration::from_secs(10), chat.as_ref() as &dyn ChatService)
        .await;
    info!(drained, "drained in-flight replies");

    shutdown::write_shutdown_context(&config.data.shutdown_context_file());

    Ok(())
}

/// Wraps a `CronForumChannel` so it can be used as the `CronForumWriter`
/// trait object in `CronHandler`, separate from the `Arc` used for the
/// source/sink roles.
struct CronForumChannelWriter(Arc<CronForumChannel>);

#[async_trait::async_trait]
impl discoclaw_cron::subsystem::CronForumWriter for CronForumChannelWriter {
    async fn create_job_thread(&self, name: &str, schedule: &str, prompt: &str) -> Result<String, String> {
        self.0.create_job_thread(name, schedule, prompt).await
    }

    async fn update_job_thread(&self, id: &str, schedule: Option<&str>, prompt: Option<&str>) -> Result<(), String> {
        self.0.update_job_thread(id, schedule, prompt).await
    }

    async fn delete_job_thread(&self, id: &str) -> Result<(), String> {
        self.0.delete_job_thread(id).await
    }
}

fn build_runtime_registry(config: &DiscoclawConfig) -> RuntimeRegistry {
    let mut builder = RuntimeRegistry::builder();
    let cap = config.runtime.max_concurrent_invocations;

    for id in &config.runtime.enabled_runtimes {
        match id {
            RuntimeId::Claude => {
                let creds = &config.runtime.claude;
                builder = builder.register(
                    Arc::new(ClaudeCliAdapter::new(
                        creds.command.clone(),
                        creds.fast_model.clone(),
                        creds.capable_model.clone(),
                    )),
                    cap,
                );
            }
            RuntimeId::Codex => {
                let creds = &config.runtime.codex;
                builder = builder.register(
                    Arc::new(CodexCliAdapter::new(
                        creds.command.clone(),
                        creds.fast_model.clone(),
                        creds.capable_model.clone(),
                    )),
                    cap,
                );
            }
            RuntimeId::Gemini => {
                let creds = &config.runtime.gemini;
                builder = builder.register(
                    Arc::new(GeminiCliAdapter::new(
                        creds.command.clone(),
                        creds.fast_model.clone(),
                        creds.capable_model.clone(),
                    )),
                    cap,
                );
            }
            RuntimeId::Openai => {
                let creds = &config.runtime.openai;
                builder = builder.register(
                    Arc::new(OpenAiCompatAdapter::new(
                        RuntimeId::Openai,
                        creds.api_key.clone(),
                        creds.base_url.clone(),
                        creds.chat_path.clone(),
                        creds.fast_model.clone(),
                        creds.capable_model.clone(),
                    )),
                    cap,
                );
            }
            RuntimeId::Openrouter => {
                let creds = &config.runtime.openrouter;
                builder = builder.register(
                    Arc::new(OpenAiCompatAdapter::new(
                        RuntimeId::Openrouter,
                        creds.api_key.clone(),
                        creds.base_url.clone(),
                        creds.chat_path.clone(),
                        creds.fast_model.clone(),
                        creds.capable_model.clone(),
                    )),
                    cap,
                );
            }
        }
    }

    if !config.runtime.enabled_runtimes.contains(&config.runtime.primary_runtime) {
        error!("primary_runtime is not in enabled_runtimes; it will have no adapter registered");
    }

    builder.build(config.runtime.primary_runtime)
}
