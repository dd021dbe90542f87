//! Drives the drafter -> auditor -> [revise -> auditor]* loop described in
//! spec.md §4.6. A lock-guarded state struct serialises at most one run per
//! instance, and progress is reported through callbacks rather than
//! returned incrementally.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use discoclaw_core::config::RuntimeId;
use discoclaw_core::planfile::{self, PlanStatus};
use discoclaw_runtime::{session_key, EngineEvent, InvokeParams, RuntimeError, RuntimeRegistry};
use discoclaw_tasks::{find_open_by_title, TaskStore};
use futures_util::StreamExt;
use tracing::instrument;

use crate::error::{ForgeError, Result};
use crate::template::fallback_template;
use crate::types::{FinalVerdict, ForgeProgress, ForgeRunResult, ProgressCallback};
use crate::verdict;

const DRAFTER_TOOLS: &[&str] = &["Read", "Glob", "Grep"];

struct OrchestratorState {
    running: bool,
    cancel_requested: bool,
    current_plan_id: Option<String>,
    current_plan_path: Option<PathBuf>,
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self {
            running: false,
            cancel_requested: false,
            current_plan_id: None,
            current_plan_path: None,
        }
    }
}

pub struct ForgeOrchestrator {
    registry: Arc<RuntimeRegistry>,
    runtime_id: RuntimeId,
    tasks: Arc<TaskStore>,
    plans_dir: PathBuf,
    workspace_root: PathBuf,
    drafter_model: String,
    auditor_model: String,
    max_audit_rounds: u32,
    state: RwLock<OrchestratorState>,
}

fn noop_progress(_: ForgeProgress) {}

fn emit(cb: &Option<ProgressCallback>, p: ForgeProgress) {
    match cb {
        Some(f) => f(p),
        None => noop_progress(p),
    }
}

impl ForgeOrchestrator {
    pub fn new(
        registry: Arc<RuntimeRegistry>,
        runtime_id: RuntimeId,
        tasks: Arc<TaskStore>,
        plans_dir: PathBuf,
        workspace_root: PathBuf,
        drafter_model: String,
        auditor_model: String,
        max_audit_rounds: u32,
    ) -> Self {
        Self {
            registry,
            runtime_id,
            tasks,
            plans_dir,
            workspace_root,
            drafter_model,
            auditor_model,
            max_audit_rounds,
            state: RwLock::new(OrchestratorState::default()),
        }
    }

    /// Flips the cancel flag; the running loop checks it at the next round
    /// boundary rather than being aborted forcibly mid-invocation.
    pub fn request_cancel(&self) {
        self.state.write().expect("forge state lock poisoned").cancel_requested = true;
    }

    pub fn is_running(&self) -> bool {
        self.state.read().expect("forge state lock poisoned").running
    }

    fn begin(&self, plan_id: &str, plan_path: &Path) -> Result<()> {
        let mut state = self.state.write().expect("forge state lock poisoned");
        if state.running {
            return Err(ForgeError::ConcurrentForge);
        }
        state.running = true;
        state.cancel_requested = false;
        state.current_plan_id = Some(plan_id.to_string());
        state.current_plan_path = Some(plan_path.to_path_buf());
        Ok(())
    }

    fn end(&self) {
        let mut state = self.state.write().expect("forge state lock poisoned");
        state.running = false;
        state.current_plan_id = None;
        state.current_plan_path = None;
    }

    fn cancel_requested(&self) -> bool {
        self.state.read().expect("forge state lock poisoned").cancel_requested
    }

    #[instrument(skip(self, prompt, progress), fields(session_key))]
    async fn invoke_text(
        &self,
        session_purpose: &str,
        model: &str,
        scope: &str,
        prompt: String,
        progress: &Option<ProgressCallback>,
    ) -> Result<String> {
        let key = session_key(session_purpose, model, scope);
        let params = InvokeParams::new(prompt, model, key)
            .with_cwd(self.workspace_root.clone())
            .with_tools(DRAFTER_TOOLS.iter().map(|s| s.to_string()).collect())
            .with_timeout(Duration::from_secs(1800));

        let mut stream = self.registry.invoke(self.runtime_id, params).await.map_err(ForgeError::Runtime)?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                EngineEvent::TextDelta { text: t } => text.push_str(&t),
                EngineEvent::TextFinal { text: t } => text = t,
                EngineEvent::Error { message } => {
                    emit(progress, ForgeProgress::new(format!("runtime error: {message}")));
                    return Err(ForgeError::Runtime(RuntimeError::new(message)));
                }
                _ => {}
            }
        }
        Ok(text)
    }

    fn backing_task(&self, description: &str, existing_task_id: Option<&str>) -> Result<String> {
        if let Some(id) = existing_task_id {
            let task = self.tasks.get(id);
            if let Some(task) = task {
                if !task.labels.iter().any(|l| l == "plan") {
                    let mut labels = task.labels.clone();
                    labels.push("plan".to_string());
                    self.tasks.update(id, None, None, Some(labels))?;
                }
                return Ok(task.id);
            }
        }
        let tasks = self.tasks.list();
        if let Some(existing) = find_open_by_title(&tasks, description) {
            return Ok(existing.id.clone());
        }
        let task = self.tasks.create(description.to_string(), None, vec!["plan".to_string()], None)?;
        Ok(task.id)
    }

    fn drafter_prompt(&self, description: &str, context: Option<&str>, project_context: Option<&str>) -> String {
        let mut prompt = format!(
            "Draft an implementation plan for the following request:\n\n{description}\n\n\
             Use this structure as a starting point:\n\n{}\n",
            fallback_template("<title>", "<task_id>")
        );
        if let Some(ctx) = context {
            prompt.push_str(&format!("\n## Context\n{ctx}\n"));
        }
        if let Some(pc) = project_context {
            prompt.push_str(&format!("\n## Project context\n{pc}\n"));
        }
        prompt
    }

    fn auditor_prompt(&self, plan_content: &str, round: u32, project_context: Option<&str>, prior_instructions: Option<&str>) -> String {
        let mut prompt = format!(
            "You are auditing round {round} of the following plan. For each concern write \
             `**Concern N:** <description> **Severity: blocking|medium|minor|suggestion**`. \
             End with either `**Verdict:** Needs revision.` or `**Verdict:** Ready to approve.`.\n\n\
             ## Plan under review\n{plan_content}\n"
        );
        if let Some(pc) = project_context {
            prompt.push_str(&format!("\n## Project context\n{pc}\n"));
        }
        if round >= 2 {
            if let Some(prior) = prior_instructions {
                prompt.push_str(&format!("\n## Prior-round instructions\n{prior}\n"));
            }
        }
        prompt
    }

    fn revision_prompt(&self, plan_content: &str, audit_text: &str) -> String {
        format!(
            "Revise the plan below to address the auditor's concerns. Keep the required \
             section headings. Return the full updated plan markdown.\n\n\
             ## Current plan\n{plan_content}\n\n## Auditor feedback\n{audit_text}\n"
        )
    }

    fn plan_file_name(plan_id: &str, title: &str) -> String {
        let slug = planfile::slugify(title);
        if slug.is_empty() {
            format!("{plan_id}.md")
        } else {
            format!("{plan_id}-{slug}.md")
        }
    }

    /// Start a new forge run from a free-form description.
    #[instrument(skip(self, description, progress))]
    pub async fn run(
        &self,
        description: &str,
        existing_task_id: Option<&str>,
        context: Option<&str>,
        project_context: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> Result<ForgeRunResult> {
        std::fs::create_dir_all(&self.plans_dir)?;
        let plan_id = planfile::next_plan_id(&self.plans_dir)?;

        // Reserve the plan id immediately so the guard below protects the
        // whole drafting+auditing sequence.
        let placeholder_path = self.plans_dir.join(format!("{plan_id}.md"));
        self.begin(&plan_id, &placeholder_path)?;
        let result = self
            .run_inner(&plan_id, description, existing_task_id, context, project_context, progress)
            .await;
        self.end();
        result
    }

    async fn run_inner(
        &self,
        plan_id: &str,
        description: &str,
        existing_task_id: Option<&str>,
        context: Option<&str>,
        project_context: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> Result<ForgeRunResult> {
        let task_id = self.backing_task(description, existing_task_id)?;

        emit(&progress, ForgeProgress::new("Drafter starting"));
        let prompt = self.drafter_prompt(description, context, project_context);
        let drafted = self
            .invoke_text(plan_id, &self.drafter_model, "drafter", prompt, &progress)
            .await?;

        let header = planfile::parse_header(&drafted).ok();
        let title = header.as_ref().map(|h| h.title.clone()).filter(|t| !t.is_empty()).unwrap_or_else(|| description.to_string());
        if !title.eq_ignore_ascii_case(description) {
            let _ = self.tasks.update(&task_id, Some(title.clone()), None, None);
        }

        let file_name = Self::plan_file_name(plan_id, &title);
        let file_path = self.plans_dir.join(&file_name);
        write_plan_atomic(&file_path, &drafted)?;
        {
            let mut state = self.state.write().expect("forge state lock poisoned");
            state.current_plan_path = Some(file_path.clone());
        }

        emit(&progress, ForgeProgress::forced("Draft complete"));

        self.audit_loop(plan_id, &file_path, &task_id, project_context, progress, 0)
            .await
    }

    /// Resume an existing plan at the audit stage. Only valid for plans
    /// whose header status is `REVIEW`.
    #[instrument(skip(self, title, progress))]
    pub async fn resume(
        &self,
        plan_id: &str,
        file_path: &Path,
        title: &str,
        project_context: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> Result<ForgeRunResult> {
        let content = std::fs::read_to_string(file_path)?;
        let header = planfile::parse_header(&content).map_err(ForgeError::InvalidResumeState)?;

        match header.status {
            PlanStatus::Review => {}
            PlanStatus::Implementing => {
                return Err(ForgeError::InvalidResumeState(
                    "plan is currently being implemented".to_string(),
                ))
            }
            PlanStatus::Approved => {
                return Err(ForgeError::InvalidResumeState(
                    "plan is approved; downgrade first".to_string(),
                ))
            }
            _ => {
                return Err(ForgeError::InvalidResumeState(format!(
                    "cannot resume a plan in status {}",
                    header.status.as_str()
                )))
            }
        }

        let missing = planfile::missing_sections(&content);
        if !missing.is_empty() {
            return Err(ForgeError::StructuralIssues(missing));
        }

        self.begin(plan_id, file_path)?;
        let task_id = self.backing_task(title, Some(&header.task_id))?;
        let result = self
            .audit_loop(plan_id, file_path, &task_id, project_context, progress, 0)
            .await;
        self.end();
        result
    }

    async fn audit_loop(
        &self,
        plan_id: &str,
        file_path: &Path,
        _task_id: &str,
        project_context: Option<&str>,
        progress: Option<ProgressCallback>,
        rounds_already_run: u32,
    ) -> Result<ForgeRunResult> {
        let mut rounds = rounds_already_run;
        let mut prior_instructions: Option<String> = None;
        let mut last_audit_text = String::new();
        let mut audit_blocks: Vec<String> = existing_audit_blocks(file_path)?;

        loop {
            if self.cancel_requested() {
                emit(&progress, ForgeProgress::forced("Forge cancelled"));
                return Ok(ForgeRunResult {
                    plan_id: plan_id.to_string(),
                    file_path: file_path.to_path_buf(),
                    rounds,
                    reached_max_rounds: false,
                    final_verdict: FinalVerdict::Cancelled,
                    plan_summary: last_audit_text,
                    error: None,
                });
            }

            rounds += 1;
            emit(&progress, ForgeProgress::new(format!("Audit round {rounds}/{}", self.max_audit_rounds)));

            let plan_content = std::fs::read_to_string(file_path)?;
            let audit_prompt = self.auditor_prompt(&plan_content, rounds, project_context, prior_instructions.as_deref());
            let audit_text = self
                .invoke_text(plan_id, &self.auditor_model, "auditor", audit_prompt, &progress)
                .await?;

            audit_blocks.push(format!("### Review {rounds}\n{audit_text}"));
            write_plan_atomic(file_path, &compose_plan(&plan_content, &audit_blocks))?;
            last_audit_text = audit_text.clone();

            let max_sev = verdict::max_severity(&audit_text);
            if let Some(sev) = max_sev {
                let label = match sev {
                    verdict::Severity::Blocking | verdict::Severity::Medium => "medium concerns",
                    _ => "minor concerns",
                };
                emit(&progress, ForgeProgress::new(format!("Audit round {rounds} found {label}")));
            }

            let should_loop = verdict::should_loop(&audit_text);

            if !should_loop {
                emit(&progress, ForgeProgress::forced("Forge complete"));
                return Ok(ForgeRunResult {
                    plan_id: plan_id.to_string(),
                    file_path: file_path.to_path_buf(),
                    rounds,
                    reached_max_rounds: false,
                    final_verdict: FinalVerdict::ReadyToApprove,
                    plan_summary: audit_text,
                    error: None,
                });
            }

            if rounds >= self.max_audit_rounds {
                emit(&progress, ForgeProgress::forced(format!("Forge stopped after {rounds} audit rounds")));
                return Ok(ForgeRunResult {
                    plan_id: plan_id.to_string(),
                    file_path: file_path.to_path_buf(),
                    rounds,
                    reached_max_rounds: true,
                    final_verdict: FinalVerdict::NeedsRevision,
                    plan_summary: audit_text,
                    error: None,
                });
            }

            if self.cancel_requested() {
                emit(&progress, ForgeProgress::forced("Forge cancelled"));
                return Ok(ForgeRunResult {
                    plan_id: plan_id.to_string(),
                    file_path: file_path.to_path_buf(),
                    rounds,
                    reached_max_rounds: false,
                    final_verdict: FinalVerdict::Cancelled,
                    plan_summary: last_audit_text,
                    error: None,
                });
            }

            let plan_content = std::fs::read_to_string(file_path)?;
            let revision_prompt = self.revision_prompt(&plan_content, &audit_text);
            let revised = self
                .invoke_text(plan_id, &self.drafter_model, "drafter", revision_prompt, &progress)
                .await?;
            // The revision prompt asks for "the full updated plan markdown", which
            // the model may or may not echo back with an intact Audit Log — the
            // accumulated trail is orchestrator state, so splice it back in rather
            // than trusting the revision to have preserved it verbatim.
            write_plan_atomic(file_path, &compose_plan(&revised, &audit_blocks))?;
            prior_instructions = Some(audit_text);
        }
    }
}

fn append_audit_round(path: &Path, plan_content: &str, round: u32, audit_text: &str) -> std::io::Result<()> {
    let block = format!("\n### Review {round}\n{audit_text}\n");
    let updated = if let Some(idx) = plan_content.find("## Audit Log") {
        let insert_at = plan_content[idx..]
            .find("## Implementation Notes")
            .map(|rel| idx + rel)
            .unwrap_or(plan_content.len());
        let mut out = String::with_capacity(plan_content.len() + block.len());
        out.push_str(&plan_content[..insert_at]);
        out.push_str(&block);
        out.push('\n');
        out.push_str(&plan_content[insert_at..]);
        out
    } else {
        format!("{plan_content}\n## Audit Log\n{block}\n## Implementation Notes\n")
    };
    write_plan_atomic(path, &updated)
}

fn write_plan_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_file_name_uses_slug() {
        assert_eq!(
            ForgeOrchestrator::plan_file_name("plan-003", "Fix the Thing"),
            "plan-003-fix-the-thing.md"
        );
    }

    #[test]
    fn append_audit_round_inserts_before_implementation_notes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.md");
        let content = "## Objective\nhi\n## Audit Log\n## Implementation Notes\nnotes\n";
        std::fs::write(&path, content).unwrap();
        append_audit_round(&path, content, 1, "**Verdict:** Ready to approve.").unwrap();
        let updated = std::fs::read_to_string(&path).unwrap();
        assert!(updated.find("### Review 1").unwrap() < updated.find("## Implementation Notes").unwrap());
        assert!(updated.contains("notes"));
    }

    struct ScriptedAdapter {
        calls: std::sync::atomic::AtomicUsize,
        responses: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl discoclaw_runtime::RuntimeAdapter for ScriptedAdapter {
        fn id(&self) -> RuntimeId {
            RuntimeId::Claude
        }
        fn capabilities(&self) -> std::collections::HashSet<discoclaw_runtime::Capability> {
            std::collections::HashSet::new()
        }
        fn resolve_model(&self, model: &str) -> String {
            model.to_string()
        }
        async fn invoke(&self, _params: InvokeParams) -> discoclaw_runtime::EventStream {
            let idx = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let text = self.responses.get(idx).copied().unwrap_or("").to_string();
            Box::pin(tokio_stream::iter(vec![EngineEvent::TextFinal { text }, EngineEvent::Done]))
        }
    }

    fn test_registry(responses: Vec<&'static str>) -> Arc<RuntimeRegistry> {
        let adapter = Arc::new(ScriptedAdapter {
            calls: std::sync::atomic::AtomicUsize::new(0),
            responses,
        });
        Arc::new(RuntimeRegistry::builder().register(adapter, 0).build(RuntimeId::Claude))
    }

    #[tokio::test]
    async fn clean_run_completes_in_one_audit_round() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Arc::new(TaskStore::load(dir.path().join("tasks.jsonl")));
        let draft = "# Plan: Fix the thing\n**ID:** plan-001\n**Task:** ws-1\n**Status:** DRAFT\n\n\
            ## Objective\nx\n## Scope\nx\n## Changes\nx\n## Risks\nx\n## Testing\nx\n\
            ## Audit Log\n## Implementation Notes\n";
        let registry = test_registry(vec![draft, "**Verdict:** Ready to approve.\n"]);
        let orch = ForgeOrchestrator::new(
            registry,
            RuntimeId::Claude,
            tasks,
            dir.path().join("plans"),
            dir.path().to_path_buf(),
            "capable".to_string(),
            "capable".to_string(),
            5,
        );

        let result = orch.run("fix the thing", None, None, None, None).await.unwrap();
        assert_eq!(result.rounds, 1);
        assert!(!result.reached_max_rounds);
        assert_eq!(result.final_verdict, FinalVerdict::ReadyToApprove);
        assert!(!orch.is_running());

        let on_disk = std::fs::read_to_string(&result.file_path).unwrap();
        assert!(on_disk.contains("### Review 1"));
    }

    #[tokio::test]
    async fn blocking_concern_triggers_revision_then_second_round() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Arc::new(TaskStore::load(dir.path().join("tasks.jsonl")));
        let draft = "# Plan: Fix the thing\n**ID:** plan-001\n**Task:** ws-1\n**Status:** DRAFT\n\n\
            ## Objective\nx\n## Scope\nx\n## Changes\nx\n## Risks\nx\n## Testing\nx\n\
            ## Audit Log\n## Implementation Notes\n";
        let revised = draft.replace("x\n## Scope", "y\n## Scope");
        let registry = test_registry(vec![
            draft,
            "**Concern 1:** missing edge case **Severity: blocking**\n**Verdict:** Needs revision.\n",
            Box::leak(revised.into_boxed_str()),
            "**Verdict:** Ready to approve.\n",
        ]);
        let orch = ForgeOrchestrator::new(
            registry,
            RuntimeId::Claude,
            tasks,
            dir.path().join("plans"),
            dir.path().to_path_buf(),
            "capable".to_string(),
            "capable".to_string(),
            5,
        );

        let result = orch.run("fix the thing", None, None, None, None).await.unwrap();
        assert_eq!(result.rounds, 2);
        assert_eq!(result.final_verdict, FinalVerdict::ReadyToApprove);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Arc::new(TaskStore::load(dir.path().join("tasks.jsonl")));
        let registry = test_registry(vec![]);
        let orch = Arc::new(ForgeOrchestrator::new(
            registry,
            RuntimeId::Claude,
            tasks,
            dir.path().join("plans"),
            dir.path().to_path_buf(),
            "capable".to_string(),
            "capable".to_string(),
            5,
        ));
        orch.begin("plan-099", Path::new("/tmp/plan-099.md")).unwrap();
        let err = orch.run("anything", None, None, None, None).await.unwrap_err();
        assert!(matches!(err, ForgeError::ConcurrentForge));
    }
}
