//! The cron run loop (spec.md §4.8): ticks every `tick_secs`, hands due jobs
//! to the executor, which takes the per-job lock, invokes the runtime with a
//! restricted action-flag set, records run stats, and releases the lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use discoclaw_actions::context::{ActionContext, ConfirmationMode, SubsystemContexts};
use discoclaw_actions::{execute_actions, parse_actions};
use discoclaw_core::config::{ActionsConfig, RuntimeId};
use discoclaw_runtime::{session_key, EngineEvent, InvokeParams, RuntimeRegistry};
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::locks::{recover_stale_locks, JobLock};
use crate::registry::CronRegistry;
use crate::source::CronForumSource;
use crate::stats::RunStatsStore;
use crate::types::{CronJob, RunResult};

/// Posts the cleaned text of a job's response back to the chat service.
/// Implemented by the Discord adapter; kept here so this crate stays
/// backend-agnostic.
#[async_trait]
pub trait CronSink: Send + Sync {
    async fn post_job_result(&self, job: &CronJob, text: &str);
}

pub struct SchedulerEngine {
    registry: Arc<CronRegistry>,
    runtime: Arc<RuntimeRegistry>,
    runtime_id: RuntimeId,
    model: String,
    stats: Arc<RunStatsStore>,
    locks_dir: PathBuf,
    tick_secs: u64,
    heartbeat_secs: u64,
    timeout: StdDuration,
}

/// A clonable handle for job introspection (list/stats) while the engine's
/// `run` loop drives execution.
#[derive(Clone)]
pub struct SchedulerHandle {
    registry: Arc<CronRegistry>,
    stats: Arc<RunStatsStore>,
}

impl SchedulerHandle {
    pub fn list_jobs(&self) -> Vec<CronJob> {
        self.registry.list()
    }

    pub fn job(&self, id: &str) -> Option<CronJob> {
        self.registry.get(id)
    }

    pub fn stats_for(&self, id: &str) -> Option<crate::types::JobRunStats> {
        self.stats.stats_for(id)
    }
}

impl SchedulerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<CronRegistry>,
        runtime: Arc<RuntimeRegistry>,
        runtime_id: RuntimeId,
        model: String,
        stats: Arc<RunStatsStore>,
        locks_dir: PathBuf,
        tick_secs: u64,
        heartbeat_secs: u64,
        timeout: StdDuration,
    ) -> Self {
        Self {
            registry,
            runtime,
            runtime_id,
            model,
            stats,
            locks_dir,
            tick_secs,
            heartbeat_secs,
            timeout,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Scan `locks_dir` for locks abandoned by an unclean shutdown and
    /// record an `Interrupted` run for each (spec.md §4.8 "Failure recovery").
    pub fn recover_on_startup(&self) {
        for job_id in recover_stale_locks(&self.locks_dir, self.heartbeat_secs) {
            if let Err(e) = self.stats.record(&job_id, Utc::now(), RunResult::Interrupted) {
                error!(job_id, error = %e, "failed to record interrupted run");
            }
        }
    }

    /// Main loop: poll every `tick_secs` until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, sink: Arc<dyn CronSink>, mut shutdown: watch::Receiver<bool>) {
        info!("cron engine started");
        self.recover_on_startup();

        let mut interval = tokio::time::interval(StdDuration::from_secs(self.tick_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&sink).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self, sink: &Arc<dyn CronSink>) {
        let now = Utc::now();
        for job in self.registry.due(now) {
            let this_sink = Arc::clone(sink);
            if let Err(e) = self.execute_job(&job, &this_sink).await {
                error!(job_id = %job.id, error = %e, "cron job execution failed to even start");
            }
        }
    }

    /// Run a single job: acquire its lock, invoke the runtime, post the
    /// result, record stats, release the lock. Returns `Ok(())` even when
    /// the invocation itself errors (that's recorded as a failed run, not
    /// a propagated error) — only lock/stats I/O failures bubble up.
    #[instrument(skip(self, sink), fields(job_id = %job.id))]
    pub async fn execute_job(&self, job: &CronJob, sink: &Arc<dyn CronSink>) -> Result<()> {
        let lock = match JobLock::acquire(&self.locks_dir, &job.id) {
            Ok(lock) => lock,
            Err(crate::error::CronError::Busy { .. }) => {
                warn!(job_id = %job.id, "job already running; skipping this tick");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let started_at = Utc::now();
        let key = session_key("cron", &self.model, &job.id);
        // No user identity, and a restricted category set: crons/memory/config
        // are never re-triggerable from inside a scheduled job (spec.md §4.8).
        let mut actions_cfg = ActionsConfig::default();
        actions_cfg.crons = false;
        actions_cfg.memory = false;
        actions_cfg.config = false;

        let params = InvokeParams::new(job.prompt.clone(), self.model.clone(), key).with_timeout(self.timeout);

        let result = self.run_once(params).await;

        let outcome = match result {
            Ok(text) => {
                let parsed = parse_actions(&text);
                let ctx = ActionContext {
                    guild_id: None,
                    channel_id: job.id.clone(),
                    message_id: String::new(),
                    thread_parent_id: Some(job.id.clone()),
                    confirmation_mode: ConfirmationMode::Automated,
                    user_id: "cron".to_string(),
                };
                let _ = execute_actions(&parsed.actions, &ctx, &SubsystemContexts::default(), &actions_cfg).await;
                sink.post_job_result(job, &parsed.clean_text).await;
                RunResult::Success
            }
            Err(message) => {
                warn!(job_id = %job.id, error = %message, "cron job invocation failed");
                sink.post_job_result(job, &format!("Runtime error: {message}")).await;
                RunResult::Failure
            }
        };

        self.registry.mark_ran(&job.id, started_at);
        self.stats.record(&job.id, started_at, outcome)?;
        lock.release();
        Ok(())
    }

    async fn run_once(&self, params: InvokeParams) -> std::result::Result<String, String> {
        let mut stream = self
            .runtime
            .invoke(self.runtime_id, params)
            .await
            .map_err(|e| e.to_string())?;

        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                EngineEvent::TextDelta { text: t } => text.push_str(&t),
                EngineEvent::TextFinal { text: t } => text = t,
                EngineEvent::Error { message } => return Err(message),
                _ => {}
            }
        }
        Ok(text)
    }
}

/// Reconcile the registry against the forum once; called at startup and by
/// the sync coordinator's debounced watcher.
pub async fn sync_now(registry: &CronRegistry, source: &dyn CronForumSource) {
    registry.sync(source).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawJobThread;
    use discoclaw_runtime::{Capability, EventStream, RuntimeAdapter};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdapter {
        calls: Arc<AtomicUsize>,
        delay: StdDuration,
    }

    #[async_trait::async_trait]
    impl RuntimeAdapter for CountingAdapter {
        fn id(&self) -> RuntimeId {
            RuntimeId::Claude
        }
        fn capabilities(&self) -> HashSet<Capability> {
            HashSet::new()
        }
        fn resolve_model(&self, model: &str) -> String {
            model.to_string()
        }
        async fn invoke(&self, _params: InvokeParams) -> EventStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Box::pin(tokio_stream::once(EngineEvent::TextFinal { text: "ok".into() }))
        }
    }

    struct NullSink;
    #[async_trait::async_trait]
    impl CronSink for NullSink {
        async fn post_job_result(&self, _job: &CronJob, _text: &str) {}
    }

    fn make_job(id: &str) -> CronJob {
        CronJob {
            id: id.to_string(),
            name: "test job".into(),
            schedule: crate::types::Schedule::Every { every_secs: 60 },
            tags: vec![],
            last_run_at: None,
            next_run_at: Some(Utc::now()),
            enabled: true,
            prompt: "do the thing".into(),
        }
    }

    #[tokio::test]
    async fn concurrent_executions_run_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(CountingAdapter {
            calls: Arc::clone(&calls),
            delay: StdDuration::from_millis(50),
        });
        let runtime = Arc::new(RuntimeRegistry::builder().register(adapter, 0).build(RuntimeId::Claude));
        let registry = Arc::new(CronRegistry::new(0));
        let dir = tempfile::tempdir().unwrap();
        let stats = Arc::new(RunStatsStore::load(dir.path().join("stats.json")));

        let engine = Arc::new(SchedulerEngine::new(
            registry,
            runtime,
            RuntimeId::Claude,
            "capable".into(),
            stats,
            dir.path().join("locks"),
            1,
            1800,
            StdDuration::from_secs(5),
        ));

        let job = make_job("job-1");
        let sink: Arc<dyn CronSink> = Arc::new(NullSink);

        let (r1, r2) = tokio::join!(engine.execute_job(&job, &sink), engine.execute_job(&job, &sink));
        r1.unwrap();
        r2.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sync_then_registry_lists_job() {
        struct OneJobSource;
        #[async_trait::async_trait]
        impl CronForumSource for OneJobSource {
            async fn list_job_threads(&self) -> std::result::Result<Vec<RawJobThread>, String> {
                Ok(vec![RawJobThread {
                    thread_id: "t1".into(),
                    name: "j".into(),
                    tags: vec![],
                    body: "every 1s\nhello".into(),
                    enabled: true,
                }])
            }
        }

        let registry = CronRegistry::new(0);
        registry.sync(&OneJobSource).await;
        assert_eq!(registry.list().len(), 1);
    }
}
