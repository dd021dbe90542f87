//! Sidecar persistence: a canonical JSON file plus a human-readable markdown
//! mirror. The reader prefers JSON; on a JSON parse error it falls back to
//! the markdown and best-effort back-fills the JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;
use crate::types::{Phase, PhaseKind, PhaseStatus, PlanPhases};

pub fn sidecar_paths(dir: &Path, plan_id: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{plan_id}-phases.md")),
        dir.join(format!("{plan_id}-phases.json")),
    )
}

fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write both the JSON sidecar and its markdown mirror atomically.
pub fn save(dir: &Path, phases: &PlanPhases) -> Result<()> {
    let (md_path, json_path) = sidecar_paths(dir, &phases.plan_id);
    let json = serde_json::to_string_pretty(phases)?;
    atomic_write(&json_path, &json)?;
    atomic_write(&md_path, &render_markdown(phases))?;
    Ok(())
}

/// Load phases for `plan_id` from `dir`. Prefers the JSON sidecar; on parse
/// failure falls back to the markdown mirror and rewrites the JSON from it.
pub fn load(dir: &Path, plan_id: &str) -> Result<PlanPhases> {
    let (md_path, json_path) = sidecar_paths(dir, plan_id);
    match std::fs::read_to_string(&json_path) {
        Ok(content) => match serde_json::from_str::<PlanPhases>(&content) {
            Ok(phases) => Ok(phases),
            Err(e) => {
                warn!(path = %json_path.display(), error = %e, "corrupt phases JSON, falling back to markdown");
                let md = std::fs::read_to_string(&md_path)?;
                let phases = parse_markdown(&md)?;
                let _ = save(dir, &phases);
                Ok(phases)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let md = std::fs::read_to_string(&md_path)?;
            let phases = parse_markdown(&md)?;
            let _ = save(dir, &phases);
            Ok(phases)
        }
        Err(e) => Err(e.into()),
    }
}

fn render_markdown(phases: &PlanPhases) -> String {
    let mut out = format!(
        "# Phases for {}\n\nPlan file: {}\nContent hash: {}\nCreated: {}\nUpdated: {}\n\n",
        phases.plan_id, phases.plan_file, phases.plan_content_hash, phases.created_at, phases.updated_at
    );
    for phase in &phases.phases {
        out.push_str(&format!(
            "## {}: {} [{}] — {}\n",
            phase.id,
            phase.title,
            phase.kind.as_str(),
            phase.status.as_str()
        ));
        out.push_str(&format!(
            "Depends on: {}\n",
            if phase.depends_on.is_empty() {
                "(none)".to_string()
            } else {
                phase.depends_on.join(", ")
            }
        ));
        out.push_str(&format!("Context files: {}\n", phase.context_files.join(", ")));
        if let Some(commit) = &phase.git_commit {
            out.push_str(&format!("Commit: {commit}\n"));
        }
        if let Some(error) = &phase.error {
            out.push_str(&format!("Error: {error}\n"));
        }
        out.push('\n');
    }
    out
}

/// Best-effort parse of the markdown mirror, used only when the JSON
/// sidecar is missing or corrupt.
fn parse_markdown(md: &str) -> Result<PlanPhases> {
    let mut lines = md.lines();
    let header_line = lines.next().unwrap_or("");
    let plan_id = header_line
        .strip_prefix("# Phases for ")
        .unwrap_or("unknown")
        .trim()
        .to_string();

    let mut plan_file = String::new();
    let mut plan_content_hash = String::new();
    let mut created_at = chrono::Utc::now();
    let mut updated_at = chrono::Utc::now();

    let mut phases = Vec::new();
    let mut current: Option<Phase> = None;

    for line in md.lines() {
        if let Some(v) = line.strip_prefix("Plan file: ") {
            plan_file = v.to_string();
        } else if let Some(v) = line.strip_prefix("Content hash: ") {
            plan_content_hash = v.to_string();
        } else if let Some(v) = line.strip_prefix("Created: ") {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(v) {
                created_at = dt.with_timezone(&chrono::Utc);
            }
        } else if let Some(v) = line.strip_prefix("Updated: ") {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(v) {
                updated_at = dt.with_timezone(&chrono::Utc);
            }
        } else if let Some(rest) = line.strip_prefix("## ") {
            if let Some(p) = current.take() {
                phases.push(p);
            }
            current = Some(parse_phase_heading(rest)?);
        } else if let Some(rest) = line.strip_prefix("Depends on: ") {
            if let Some(p) = current.as_mut() {
                p.depends_on = if rest == "(none)" {
                    Vec::new()
                } else {
                    rest.split(", ").map(str::to_string).collect()
                };
            }
        } else if let Some(rest) = line.strip_prefix("Context files: ") {
            if let Some(p) = current.as_mut() {
                p.context_files = if rest.is_empty() {
                    Vec::new()
                } else {
                    rest.split(", ").map(str::to_string).collect()
                };
            }
        } else if let Some(rest) = line.strip_prefix("Commit: ") {
            if let Some(p) = current.as_mut() {
                p.git_commit = Some(rest.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("Error: ") {
            if let Some(p) = current.as_mut() {
                p.error = Some(rest.to_string());
            }
        }
    }
    if let Some(p) = current.take() {
        phases.push(p);
    }

    Ok(PlanPhases {
        version: 1,
        plan_id,
        plan_file,
        plan_content_hash,
        phases,
        created_at,
        updated_at,
    })
}

fn parse_phase_heading(rest: &str) -> Result<Phase> {
    // `<id>: <title> [<kind>] — <status>`
    let (id, rest) = rest
        .split_once(": ")
        .ok_or_else(|| crate::error::PlanError::CorruptState(format!("malformed phase heading: {rest}")))?;
    let (title, rest) = rest
        .rsplit_once(" [")
        .ok_or_else(|| crate::error::PlanError::CorruptState(format!("malformed phase heading: {rest}")))?;
    let (kind_str, status_str) = rest
        .split_once("] — ")
        .ok_or_else(|| crate::error::PlanError::CorruptState(format!("malformed phase heading: {rest}")))?;

    let kind = match kind_str {
        "implement" => PhaseKind::Implement,
        "read" => PhaseKind::Read,
        "audit" => PhaseKind::Audit,
        other => return Err(crate::error::PlanError::CorruptState(format!("unknown phase kind: {other}"))),
    };
    let status = match status_str {
        "pending" => PhaseStatus::Pending,
        "in-progress" => PhaseStatus::InProgress,
        "done" => PhaseStatus::Done,
        "failed" => PhaseStatus::Failed,
        "skipped" => PhaseStatus::Skipped,
        other => return Err(crate::error::PlanError::CorruptState(format!("unknown phase status: {other}"))),
    };

    let mut phase = Phase::new(id, title, kind);
    phase.status = status;
    Ok(phase)
}

pub fn backfill_failure_hashes(phase: &mut Phase, hashes: HashMap<String, String>) {
    phase.failure_hashes = Some(hashes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::decompose;

    #[test]
    fn save_then_load_prefers_json() {
        let dir = tempfile::tempdir().unwrap();
        let plan = "## Changes\n- `src/foo.rs` — x\n";
        let phases = decompose(plan, "plan-001", "plan-001-x.md", 5);
        save(dir.path(), &phases).unwrap();
        let loaded = load(dir.path(), "plan-001").unwrap();
        assert_eq!(loaded.plan_content_hash, phases.plan_content_hash);
        assert_eq!(loaded.phases.len(), phases.phases.len());
    }

    #[test]
    fn corrupt_json_falls_back_to_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let plan = "## Changes\n- `src/foo.rs` — x\n";
        let phases = decompose(plan, "plan-001", "plan-001-x.md", 5);
        save(dir.path(), &phases).unwrap();
        let (_, json_path) = sidecar_paths(dir.path(), "plan-001");
        std::fs::write(&json_path, "{not valid json").unwrap();

        let loaded = load(dir.path(), "plan-001").unwrap();
        assert_eq!(loaded.phases.len(), phases.phases.len());
        // Backfill should have repaired the JSON for the next read.
        let reloaded = load(dir.path(), "plan-001").unwrap();
        assert_eq!(reloaded.phases.len(), phases.phases.len());
    }
}
