//! The plan manager: phase selection, retry safety, phase execution, the
//! audit-fix loop, git snapshots/commits, and plan-completion transitions
//! (spec.md §4.7). `decompose`/`persistence`/`git` are pure/leaf helpers this
//! module wires together into the runnable engine.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use discoclaw_core::config::RuntimeId;
use discoclaw_core::planfile::{self, PlanStatus};
use discoclaw_runtime::{session_key, EngineEvent, InvokeParams, RuntimeRegistry};
use discoclaw_tasks::TaskStore;
use futures_util::StreamExt;
use tracing::{instrument, warn};

use crate::error::{PlanError, Result};
use crate::git;
use crate::persistence;
use crate::types::{Phase, PhaseKind, PhaseStatus, PlanPhases, RunOutcome};

const IMPLEMENT_TOOLS: &[&str] = &["Read", "Write", "Edit", "Glob", "Grep", "Bash"];
const READ_TOOLS: &[&str] = &["Read", "Glob", "Grep"];
const FIX_TOOLS: &[&str] = &["Read", "Write", "Edit", "Glob", "Grep"];
const CONTEXT_FILE_BUDGET_BYTES: usize = 100 * 1024;
const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(1800);

/// Severities at or above this threshold reopen the audit-fix loop, matching
/// spec.md §4.7's "any severity >= medium OR verdict says Needs revision".
fn audit_should_loop(text: &str) -> bool {
    discoclaw_forge::verdict::verdict_says_needs_revision(text)
        || matches!(
            discoclaw_forge::verdict::max_severity(text),
            Some(discoclaw_forge::verdict::Severity::Blocking) | Some(discoclaw_forge::verdict::Severity::Medium)
        )
}

pub struct PlanManager {
    registry: std::sync::Arc<RuntimeRegistry>,
    runtime_id: RuntimeId,
    tasks: std::sync::Arc<TaskStore>,
    workspace_root: PathBuf,
    plans_dir: PathBuf,
    model: String,
    max_audit_fix_attempts: u32,
    max_context_files: usize,
    /// Serialises close transitions per plan id (spec.md §4.7 "A file lock
    /// serialises these close transitions").
    close_lock: Mutex<()>,
}

impl PlanManager {
    pub fn new(
        registry: std::sync::Arc<RuntimeRegistry>,
        runtime_id: RuntimeId,
        tasks: std::sync::Arc<TaskStore>,
        workspace_root: PathBuf,
        plans_dir: PathBuf,
        model: String,
        max_audit_fix_attempts: u32,
        max_context_files: usize,
    ) -> Self {
        Self {
            registry,
            runtime_id,
            tasks,
            workspace_root,
            plans_dir,
            model,
            max_audit_fix_attempts,
            max_context_files,
            close_lock: Mutex::new(()),
        }
    }

    pub fn max_context_files(&self) -> usize {
        self.max_context_files
    }

    fn phases_dir(&self) -> PathBuf {
        self.plans_dir.clone()
    }

    /// Priority: any in-progress phase, then any failed phase, then the first
    /// pending phase whose deps are all done/skipped.
    pub fn next_phase(phases: &PlanPhases) -> Option<&Phase> {
        if let Some(p) = phases.phases.iter().find(|p| p.status == PhaseStatus::InProgress) {
            return Some(p);
        }
        if let Some(p) = phases.phases.iter().find(|p| p.status == PhaseStatus::Failed) {
            return Some(p);
        }
        phases.phases.iter().find(|p| {
            p.status == PhaseStatus::Pending
                && p.depends_on.iter().all(|dep| {
                    phases
                        .phases
                        .iter()
                        .find(|other| &other.id == dep)
                        .map(|other| other.status.is_terminal_ok())
                        .unwrap_or(false)
                })
        })
    }

    fn check_staleness(phases: &PlanPhases, current_content: &str) -> std::result::Result<(), PlanError> {
        if planfile::content_hash(current_content) != phases.plan_content_hash {
            return Err(PlanError::Stale);
        }
        Ok(())
    }

    /// Run the next runnable phase for `plan_id`, loading/saving the sidecar
    /// from `self.plans_dir`.
    #[instrument(skip(self), fields(plan_id))]
    pub async fn run_next_phase(&self, plan_id: &str) -> Result<RunOutcome> {
        let mut phases = persistence::load(&self.phases_dir(), plan_id)?;
        let plan_file_path = self.workspace_root.join(&phases.plan_file);
        let current_content = std::fs::read_to_string(&plan_file_path)?;

        if let Err(PlanError::Stale) = Self::check_staleness(&phases, &current_content) {
            return Ok(RunOutcome::Stale {
                message: PlanError::Stale.to_string(),
            });
        }

        let Some(phase) = Self::next_phase(&phases).cloned() else {
            return Ok(RunOutcome::NothingToRun);
        };

        let git_available = git::is_available(&self.workspace_root).await;

        if phase.status == PhaseStatus::Failed && phase.kind != PhaseKind::Audit {
            match self.prepare_retry(&phase, git_available).await {
                Ok(()) => {}
                Err(PlanError::RetryBlocked(message)) => {
                    return Ok(RunOutcome::RetryBlocked {
                        phase_id: phase.id.clone(),
                        message,
                    })
                }
                Err(e) => return Err(e),
            }
        }

        let outcome = self.execute_phase(&mut phases, &phase.id, git_available).await?;
        persistence::save(&self.phases_dir(), &phases)?;

        if matches!(outcome, RunOutcome::Done { .. } | RunOutcome::RetryBlocked { .. }) {
            self.maybe_close_plan(&plan_file_path, plan_id, &phases).await?;
        }

        Ok(outcome)
    }

    /// Retry-safety check and revert (spec.md §4.7 "Retry safety").
    async fn prepare_retry(&self, phase: &Phase, git_available: bool) -> Result<()> {
        if !git_available {
            return Ok(());
        }
        let (modified, hashes) = match (&phase.modified_files, &phase.failure_hashes) {
            (Some(m), Some(h)) => (m, h),
            _ => {
                return Err(PlanError::RetryBlocked(
                    "failed phase is missing modified_files/failure_hashes; cannot verify retry safety".to_string(),
                ))
            }
        };

        let pre_snapshot: HashSet<String> = git::modified_files(&self.workspace_root).await?.into_iter().collect();

        for file in modified {
            let current_hash = git::hash_files(&self.workspace_root, std::slice::from_ref(file))
                .get(file)
                .cloned();
            let recorded = hashes.get(file);
            if current_hash.as_deref() != recorded.map(String::as_str) {
                warn!(file = %file, "file changed externally since failed attempt; skipping revert");
                continue;
            }
            if pre_snapshot.contains(file) {
                let _ = git::revert_file(&self.workspace_root, file).await;
            } else {
                let rel = file.as_str();
                let _ = tokio::process::Command::new("git")
                    .args(["clean", "-f", "--", rel])
                    .current_dir(&self.workspace_root)
                    .output()
                    .await;
            }
        }
        Ok(())
    }

    fn tools_for(kind: PhaseKind) -> Vec<String> {
        match kind {
            PhaseKind::Implement => IMPLEMENT_TOOLS.iter().map(|s| s.to_string()).collect(),
            PhaseKind::Read | PhaseKind::Audit => READ_TOOLS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn add_dirs_for(&self, kind: PhaseKind) -> Vec<PathBuf> {
        match kind {
            // Implement phases must not be able to mutate the workspace root
            // itself; read/audit phases need it for context.
            PhaseKind::Implement => Vec::new(),
            PhaseKind::Read | PhaseKind::Audit => vec![self.workspace_root.clone()],
        }
    }

    fn read_context_files(&self, files: &[String]) -> String {
        let mut out = String::new();
        for file in files {
            let full = self.workspace_root.join(file);
            out.push_str(&format!("### {file}\n"));
            match std::fs::read(&full) {
                Ok(bytes) => {
                    let truncated = bytes.len() > CONTEXT_FILE_BUDGET_BYTES;
                    let slice = &bytes[..bytes.len().min(CONTEXT_FILE_BUDGET_BYTES)];
                    out.push_str(&String::from_utf8_lossy(slice));
                    if truncated {
                        out.push_str("\n...(truncated)\n");
                    }
                }
                Err(_) => out.push_str("(File not found)\n"),
            }
            out.push('\n');
        }
        out
    }

    fn phase_prompt(&self, phase: &Phase, plan_content: &str) -> String {
        let context = self.read_context_files(&phase.context_files);
        match phase.kind {
            PhaseKind::Read => format!(
                "Read the plan below and the listed context files, and summarize what the \
                 upcoming implement phase needs to know. Do not make changes.\n\n## Plan\n{plan_content}\n\n\
                 ## Context files\n{context}\n## Phase\n{}: {}\n",
                phase.id, phase.description
            ),
            PhaseKind::Implement => format!(
                "Implement the following phase of the plan below. Only touch the listed context \
                 files unless the plan requires new files in the same area.\n\n## Plan\n{plan_content}\n\n\
                 ## Context files\n{context}\n## Phase\n{}: {}\n{}\n",
                phase.id,
                phase.title,
                phase.change_spec.as_deref().unwrap_or(&phase.description)
            ),
            PhaseKind::Audit => format!(
                "Audit the implementation against the plan below. For each concern write \
                 `**Concern N:** <description> **Severity: blocking|medium|minor|suggestion**`. \
                 End with `**Verdict:** Needs revision.` or `**Verdict:** Ready to approve.`.\n\n\
                 ## Plan\n{plan_content}\n\n## Context files\n{context}\n"
            ),
        }
    }

    async fn invoke_phase(
        &self,
        plan_id: &str,
        phase: &Phase,
        plan_content: &str,
        tools: &[&str],
        extra_add_dirs: Vec<PathBuf>,
    ) -> std::result::Result<String, String> {
        let key = session_key(plan_id, &self.model, &phase.id);
        let prompt = self.phase_prompt(phase, plan_content);
        let params = InvokeParams::new(prompt, self.model.clone(), key)
            .with_cwd(self.workspace_root.clone())
            .with_tools(tools.iter().map(|s| s.to_string()).collect())
            .with_add_dirs(extra_add_dirs)
            .with_timeout(DEFAULT_PHASE_TIMEOUT)
            .with_tool_call_gate(true);

        let mut stream = match self.registry.invoke(self.runtime_id, params).await {
            Ok(s) => s,
            Err(e) => return Err(e.to_string()),
        };

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

    #[instrument(skip(self, phases), fields(plan_id = %phases.plan_id, phase_id))]
    async fn execute_phase(&self, phases: &mut PlanPhases, phase_id: &str, git_available: bool) -> Result<RunOutcome> {
        let plan_file_path = self.workspace_root.join(&phases.plan_file);
        let plan_content = std::fs::read_to_string(&plan_file_path)?;

        let idx = phases
            .phases
            .iter()
            .position(|p| p.id == phase_id)
            .ok_or_else(|| PlanError::Other(format!("unknown phase id: {phase_id}")))?;
        phases.phases[idx].status = PhaseStatus::InProgress;
        persistence::save(&self.phases_dir(), phases)?;

        let pre_snapshot: HashSet<String> = if git_available {
            git::modified_files(&self.workspace_root).await?.into_iter().collect()
        } else {
            HashSet::new()
        };

        let kind = phases.phases[idx].kind;
        let tools = Self::tools_for(kind);
        let tool_refs: Vec<&str> = tools.iter().map(String::as_str).collect();
        let add_dirs = self.add_dirs_for(kind);

        let invoke_result = {
            let phase = phases.phases[idx].clone();
            self.invoke_phase(&phases.plan_id, &phase, &plan_content, &tool_refs, add_dirs).await
        };

        let outcome = match invoke_result {
            Err(message) => {
                let failed_kind = if message.starts_with("blocked destructive tool call")
                    || message.contains("Destructive tool call blocked")
                {
                    format!("Destructive tool call blocked: {message}")
                } else {
                    message
                };
                self.record_failure(phases, idx, &failed_kind, git_available).await?;
                RunOutcome::Failed {
                    phase_id: phase_id.to_string(),
                    message: failed_kind,
                }
            }
            Ok(output) => {
                if kind == PhaseKind::Audit && audit_should_loop(&output) {
                    let max_sev = discoclaw_forge::verdict::max_severity(&output)
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_else(|| "medium".to_string());
                    if git_available {
                        self.run_audit_fix_loop(phases, idx, &output).await?;
                    }
                    let phase = &mut phases.phases[idx];
                    phase.status = PhaseStatus::Failed;
                    phase.output = Some(output.clone());
                    phase.error = Some(format!("audit found {max_sev} severity concerns"));
                    RunOutcome::AuditFailed {
                        phase_id: phase_id.to_string(),
                        max_severity: max_sev,
                    }
                } else {
                    self.record_success(phases, idx, &output, git_available).await?;
                    RunOutcome::Done {
                        phase_id: phase_id.to_string(),
                    }
                }
            }
        };

        phases.updated_at = chrono::Utc::now();
        Ok(outcome)
    }

    async fn record_success(&self, phases: &mut PlanPhases, idx: usize, output: &str, git_available: bool) -> Result<()> {
        let phase = &mut phases.phases[idx];
        phase.output = Some(output.to_string());
        phase.error = None;

        if git_available {
            let message = format!("{} {}: {}", phases.plan_id, phase.id, phase.title);
            let commit = git::commit_all(&self.workspace_root, &message).await?;
            let post_snapshot = git::modified_files(&self.workspace_root).await.unwrap_or_default();
            phase.git_commit = commit;
            phase.modified_files = Some(post_snapshot);
        }
        phase.status = PhaseStatus::Done;
        phase.failure_hashes = None;
        Ok(())
    }

    async fn record_failure(&self, phases: &mut PlanPhases, idx: usize, message: &str, git_available: bool) -> Result<()> {
        let phase = &mut phases.phases[idx];
        phase.status = PhaseStatus::Failed;
        phase.error = Some(message.to_string());
        if git_available {
            let modified = git::modified_files(&self.workspace_root).await.unwrap_or_default();
            let hashes = git::hash_files(&self.workspace_root, &modified);
            phase.modified_files = Some(modified);
            phase.failure_hashes = Some(hashes);
        }
        Ok(())
    }

    /// Attempt up to `max_audit_fix_attempts` restricted-tool fix rounds after
    /// an audit phase finds concerns, re-auditing after each attempt.
    async fn run_audit_fix_loop(&self, phases: &mut PlanPhases, audit_idx: usize, first_audit_text: &str) -> Result<()> {
        let plan_id = phases.plan_id.clone();
        let plan_file_path = self.workspace_root.join(&phases.plan_file);
        let mut last_audit_text = first_audit_text.to_string();

        for attempt in 1..=self.max_audit_fix_attempts {
            let plan_content = std::fs::read_to_string(&plan_file_path)?;
            let fix_prompt = format!(
                "Fix only the deviations the auditor flagged below. Do not run arbitrary shell \
                 commands; use Read/Write/Edit/Glob/Grep only.\n\n## Plan\n{plan_content}\n\n\
                 ## Auditor feedback\n{last_audit_text}\n"
            );
            let key = session_key(&plan_id, &self.model, &format!("audit-fix-{attempt}"));
            let params = InvokeParams::new(fix_prompt, self.model.clone(), key)
                .with_cwd(self.workspace_root.clone())
                .with_tools(FIX_TOOLS.iter().map(|s| s.to_string()).collect())
                .with_timeout(DEFAULT_PHASE_TIMEOUT)
                .with_tool_call_gate(true);

            let fix_result = match self.registry.invoke(self.runtime_id, params).await {
                Ok(mut stream) => {
                    let mut text = String::new();
                    let mut err = None;
                    while let Some(event) = stream.next().await {
                        match event {
                            EngineEvent::TextDelta { text: t } => text.push_str(&t),
                            EngineEvent::TextFinal { text: t } => text = t,
                            EngineEvent::Error { message } => err = Some(message),
                            _ => {}
                        }
                    }
                    err.map(Err).unwrap_or(Ok(text))
                }
                Err(e) => Err(e.to_string()),
            };

            if fix_result.is_err() {
                continue;
            }

            let re_audit = {
                let phase = phases.phases[audit_idx].clone();
                let plan_content = std::fs::read_to_string(&plan_file_path)?;
                self.invoke_phase(&plan_id, &phase, &plan_content, READ_TOOLS, vec![self.workspace_root.clone()])
                    .await
            };

            match re_audit {
                Ok(text) => {
                    last_audit_text = text.clone();
                    if !audit_should_loop(&text) {
                        let message = format!("{} audit-fix-{}: resolved concerns", plan_id, attempt);
                        let commit = git::commit_all(&self.workspace_root, &message).await?;
                        phases.phases[audit_idx].git_commit = commit;
                        phases.phases[audit_idx].output = Some(text);
                        phases.phases[audit_idx].status = PhaseStatus::Done;
                        phases.phases[audit_idx].error = None;
                        return Ok(());
                    }
                }
                Err(message) => {
                    last_audit_text = format!("audit_failed: {message}");
                }
            }
        }

        // Exhausted without a clean verdict: roll back the fix agent's changes.
        git::revert_all(&self.workspace_root).await?;
        phases.phases[audit_idx].output = Some(last_audit_text);
        Ok(())
    }

    /// After a successful phase run, close the plan if every phase is
    /// done/skipped and the plan's status permits it.
    async fn maybe_close_plan(&self, plan_file_path: &Path, plan_id: &str, phases: &PlanPhases) -> Result<()> {
        let _guard = self.close_lock.lock().expect("plan close lock poisoned");
        if !phases.phases.iter().all(|p| p.status.is_terminal_ok()) {
            return Ok(());
        }
        let content = std::fs::read_to_string(plan_file_path)?;
        let header = match planfile::parse_header(&content) {
            Ok(h) => h,
            Err(_) => return Ok(()),
        };
        if !matches!(header.status, PlanStatus::Approved | PlanStatus::Implementing) {
            return Ok(());
        }
        let updated = set_status_line(&content, PlanStatus::Closed);
        write_atomic(plan_file_path, &updated)?;

        if let Some(task) = self.tasks.get(&header.task_id) {
            if task.status != discoclaw_tasks::TaskStatus::Closed {
                let _ = self.tasks.set_status(&header.task_id, discoclaw_tasks::TaskStatus::Closed);
            }
        }
        let _ = plan_id;
        Ok(())
    }
}

fn set_status_line(content: &str, status: PlanStatus) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        if line.trim_start().starts_with("**Status:**") {
            out.push_str(&format!("**Status:** {}\n", status.as_str()));
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::decompose;
    use discoclaw_core::config::RuntimeId;
    use discoclaw_runtime::{EventStream, RuntimeAdapter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn phase_ordering_fixture() -> PlanPhases {
        let plan = "## Changes\n- `src/a.rs` — x\n- `src/b.rs` — y\n";
        decompose(plan, "plan-001", "plan-001-x.md", 5)
    }

    #[test]
    fn next_phase_returns_first_unblocked_pending() {
        let phases = phase_ordering_fixture();
        let next = PlanManager::next_phase(&phases).unwrap();
        assert_eq!(next.id, "phase-1");
        assert!(next.depends_on.is_empty());
    }

    #[test]
    fn next_phase_prioritizes_in_progress_over_pending() {
        let mut phases = phase_ordering_fixture();
        phases.phases[1].status = PhaseStatus::InProgress;
        let next = PlanManager::next_phase(&phases).unwrap();
        assert_eq!(next.id, phases.phases[1].id);
    }

    #[test]
    fn next_phase_respects_unmet_dependencies() {
        let mut phases = phase_ordering_fixture();
        // phase-1 still pending, so phase-2's implement phase before it
        // shouldn't run, but the audit phase depends on all implement phases.
        let audit = phases.phases.last().unwrap();
        assert!(!audit.depends_on.is_empty());
        phases.phases[0].status = PhaseStatus::Done;
        let next = PlanManager::next_phase(&phases);
        // second implement phase (index 1) should now be runnable.
        assert_eq!(next.unwrap().id, phases.phases[1].id);
    }

    #[test]
    fn next_phase_none_when_all_terminal() {
        let mut phases = phase_ordering_fixture();
        for p in phases.phases.iter_mut() {
            p.status = PhaseStatus::Done;
        }
        assert!(PlanManager::next_phase(&phases).is_none());
    }

    #[test]
    fn staleness_roundtrip() {
        let content = "## Changes\n- `src/a.rs` — x\n";
        let phases = decompose(content, "plan-001", "plan-001-x.md", 5);
        assert!(PlanManager::check_staleness(&phases, content).is_ok());
        let mutated = format!("{content}\n");
        assert!(matches!(
            PlanManager::check_staleness(&phases, &mutated),
            Err(PlanError::Stale)
        ));
    }

    struct ScriptedAdapter {
        calls: AtomicUsize,
        responses: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl RuntimeAdapter for ScriptedAdapter {
        fn id(&self) -> RuntimeId {
            RuntimeId::Claude
        }
        fn capabilities(&self) -> std::collections::HashSet<discoclaw_runtime::Capability> {
            std::collections::HashSet::new()
        }
        fn resolve_model(&self, model: &str) -> String {
            model.to_string()
        }
        async fn invoke(&self, _params: InvokeParams) -> EventStream {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self.responses.get(idx).copied().unwrap_or("").to_string();
            Box::pin(tokio_stream::iter(vec![EngineEvent::TextFinal { text }, EngineEvent::Done]))
        }
    }

    fn test_manager(dir: &Path, responses: Vec<&'static str>) -> PlanManager {
        let adapter = std::sync::Arc::new(ScriptedAdapter {
            calls: AtomicUsize::new(0),
            responses,
        });
        let registry = std::sync::Arc::new(RuntimeRegistry::builder().register(adapter, 0).build(RuntimeId::Claude));
        let tasks = std::sync::Arc::new(TaskStore::load(dir.join("tasks.jsonl")));
        PlanManager::new(
            registry,
            RuntimeId::Claude,
            tasks,
            dir.to_path_buf(),
            dir.join("plans"),
            "capable".to_string(),
            2,
            5,
        )
    }

    #[tokio::test]
    async fn stale_plan_blocks_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plans")).unwrap();
        let plan_content = "## Changes\n- `src/a.rs` — x\n";
        std::fs::write(dir.path().join("plans/plan-001-x.md"), plan_content).unwrap();
        let phases = decompose(plan_content, "plan-001", "plans/plan-001-x.md", 5);
        persistence::save(&dir.path().join("plans"), &phases).unwrap();
        // Mutate the plan file after decomposition.
        std::fs::write(dir.path().join("plans/plan-001-x.md"), format!("{plan_content}\n")).unwrap();

        let manager = test_manager(dir.path(), vec![]);
        let outcome = manager.run_next_phase("plan-001").await.unwrap();
        assert!(matches!(outcome, RunOutcome::Stale { .. }));
    }

    #[tokio::test]
    async fn retry_blocked_without_safety_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plans")).unwrap();
        let plan_content = "## Changes\n- `src/a.rs` — x\n";
        std::fs::write(dir.path().join("plans/plan-001-x.md"), plan_content).unwrap();

        // Set up a git repo so retry-safety is actually checked.
        let root = dir.path();
        tokio::process::Command::new("git").args(["init", "-q"]).current_dir(root).output().await.unwrap();
        tokio::process::Command::new("git")
            .args(["config", "user.email", "t@example.com"])
            .current_dir(root)
            .output()
            .await
            .unwrap();
        tokio::process::Command::new("git").args(["config", "user.name", "t"]).current_dir(root).output().await.unwrap();
        tokio::process::Command::new("git").args(["add", "-A"]).current_dir(root).output().await.unwrap();
        tokio::process::Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(root).output().await.unwrap();

        let mut phases = decompose(plan_content, "plan-001", "plans/plan-001-x.md", 5);
        phases.phases[0].status = PhaseStatus::Failed;
        persistence::save(&dir.path().join("plans"), &phases).unwrap();

        let manager = test_manager(dir.path(), vec![]);
        let outcome = manager.run_next_phase("plan-001").await.unwrap();
        assert!(matches!(outcome, RunOutcome::RetryBlocked { .. }));
    }

    #[tokio::test]
    async fn clean_implement_phase_runs_to_done_without_git() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plans")).unwrap();
        let plan_content = "## Changes\n- `src/a.rs` — x\n";
        std::fs::write(dir.path().join("plans/plan-001-x.md"), plan_content).unwrap();
        let phases = decompose(plan_content, "plan-001", "plans/plan-001-x.md", 5);
        persistence::save(&dir.path().join("plans"), &phases).unwrap();

        let manager = test_manager(dir.path(), vec!["implemented src/a.rs"]);
        let outcome = manager.run_next_phase("plan-001").await.unwrap();
        assert_eq!(outcome, RunOutcome::Done { phase_id: "phase-1".to_string() });

        let reloaded = persistence::load(&dir.path().join("plans"), "plan-001").unwrap();
        assert_eq!(reloaded.phases[0].status, PhaseStatus::Done);
    }

    #[tokio::test]
    async fn audit_phase_with_blocking_severity_is_audit_failed_without_git() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plans")).unwrap();
        let plan_content = "## Changes\nGeneral cleanup.\n";
        std::fs::write(dir.path().join("plans/plan-002-x.md"), plan_content).unwrap();
        let mut phases = decompose(plan_content, "plan-002", "plans/plan-002-x.md", 5);
        phases.phases[0].status = PhaseStatus::Done; // read
        phases.phases[1].status = PhaseStatus::Done; // implement
        persistence::save(&dir.path().join("plans"), &phases).unwrap();

        let manager = test_manager(
            dir.path(),
            vec!["**Concern 1:** x **Severity: blocking**\n**Verdict:** Needs revision.\n"],
        );
        let outcome = manager.run_next_phase("plan-002").await.unwrap();
        match outcome {
            RunOutcome::AuditFailed { max_severity, .. } => assert_eq!(max_severity, "blocking"),
            other => panic!("expected AuditFailed, got {other:?}"),
        }
    }
}
