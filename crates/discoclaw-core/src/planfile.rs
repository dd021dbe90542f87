//! Shared plan-file primitives: status parsing, header extraction, content
//! hashing, slug generation, and plan-id allocation. Used by both the forge
//! orchestrator (which writes plan files) and the plan phase engine (which
//! reads them) so the two crates never need to depend on each other.

use std::path::Path;

use crate::constants::PLAN_REQUIRED_SECTIONS;

/// `Status:` values a plan header may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Draft,
    Review,
    Approved,
    Implementing,
    Closed,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Draft => "DRAFT",
            PlanStatus::Review => "REVIEW",
            PlanStatus::Approved => "APPROVED",
            PlanStatus::Implementing => "IMPLEMENTING",
            PlanStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "DRAFT" => Some(PlanStatus::Draft),
            "REVIEW" => Some(PlanStatus::Review),
            "APPROVED" => Some(PlanStatus::Approved),
            "IMPLEMENTING" => Some(PlanStatus::Implementing),
            "CLOSED" => Some(PlanStatus::Closed),
            _ => None,
        }
    }
}

/// Parsed required header fields. `task_id` accepts both `**Task:**` and the
/// legacy `**Bead:**` alias.
#[derive(Debug, Clone)]
pub struct PlanHeader {
    pub title: String,
    pub id: String,
    pub task_id: String,
    pub status: PlanStatus,
    pub project: Option<String>,
    pub created: Option<String>,
}

fn strip_bold_field<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let prefix = format!("**{label}:**");
    line.trim().strip_prefix(&prefix).map(str::trim)
}

/// Parse the header block out of plan markdown. The title comes from the
/// leading `# Plan: <title>` or `Plan: <title>` line.
pub fn parse_header(content: &str) -> Result<PlanHeader, String> {
    let mut title = None;
    let mut id = None;
    let mut task_id = None;
    let mut status = None;
    let mut project = None;
    let mut created = None;

    for line in content.lines() {
        let trimmed = line.trim_start_matches('#').trim();
        if title.is_none() {
            if let Some(t) = trimmed.strip_prefix("Plan:") {
                title = Some(t.trim().to_string());
                continue;
            }
        }
        if let Some(v) = strip_bold_field(line, "ID") {
            id = Some(v.to_string());
        } else if let Some(v) = strip_bold_field(line, "Task") {
            task_id = Some(v.to_string());
        } else if let Some(v) = strip_bold_field(line, "Bead") {
            // Legacy alias, accepted per spec.md §8 "File format compatibility".
            task_id.get_or_insert(v.to_string());
        } else if let Some(v) = strip_bold_field(line, "Status") {
            status = Some(v.to_string());
        } else if let Some(v) = strip_bold_field(line, "Project") {
            project = Some(v.to_string());
        } else if let Some(v) = strip_bold_field(line, "Created") {
            created = Some(v.to_string());
        }
    }

    let id = id.ok_or("missing **ID:** field")?;
    let task_id = task_id.ok_or("missing **Task:**/**Bead:** field")?;
    let status_raw = status.ok_or("missing **Status:** field")?;
    let status = PlanStatus::parse(&status_raw).ok_or_else(|| format!("unknown status: {status_raw}"))?;

    Ok(PlanHeader {
        title: title.unwrap_or_default(),
        id,
        task_id,
        status,
        project,
        created,
    })
}

/// Required sections missing from `content`, in spec order.
pub fn missing_sections(content: &str) -> Vec<&'static str> {
    PLAN_REQUIRED_SECTIONS
        .iter()
        .filter(|s| !content.contains(*s))
        .copied()
        .collect()
}

/// First 16 hex characters of the SHA-256 digest of `content`.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Lowercase, non-alphanumerics collapsed to hyphens, no leading/trailing
/// hyphens, capped at 50 characters.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut last_was_hyphen = true; // suppress leading hyphen
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(50);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Scan `dir` for `plan-NNN-*.md` files and return the next zero-padded-3 id,
/// e.g. `plan-018` after `plan-017-foo.md` is the highest existing.
pub fn next_plan_id(dir: &Path) -> std::io::Result<String> {
    let mut max_seen = 0u32;
    if dir.exists() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix("plan-") {
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                if digits.len() == 3 {
                    if let Ok(n) = digits.parse::<u32>() {
                        max_seen = max_seen.max(n);
                    }
                }
            }
        }
    }
    Ok(format!("plan-{:03}", max_seen + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_invariants() {
        assert_eq!(slugify("Fix the Thing!!"), "fix-the-thing");
        assert_eq!(slugify("  --leading"), "leading");
        assert_eq!(slugify("trailing--  "), "trailing");
        let long = "a".repeat(80);
        assert!(slugify(&long).len() <= 50);
    }

    #[test]
    fn plan_id_monotonicity() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=3 {
            std::fs::write(dir.path().join(format!("plan-{:03}-x.md", i)), "x").unwrap();
        }
        assert_eq!(next_plan_id(dir.path()).unwrap(), "plan-004");
    }

    #[test]
    fn empty_dir_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_plan_id(dir.path()).unwrap(), "plan-001");
    }

    #[test]
    fn header_accepts_task_and_legacy_bead() {
        let content = "# Plan: Foo\n**ID:** plan-001\n**Task:** ws-1\n**Status:** DRAFT\n";
        let h = parse_header(content).unwrap();
        assert_eq!(h.task_id, "ws-1");

        let legacy = "# Plan: Foo\n**ID:** plan-001\n**Bead:** ws-2\n**Status:** DRAFT\n";
        let h2 = parse_header(legacy).unwrap();
        assert_eq!(h2.task_id, "ws-2");
    }

    #[test]
    fn missing_sections_lists_all_absent() {
        let content = "## Objective\nhi\n";
        let missing = missing_sections(content);
        assert!(missing.contains(&"## Changes"));
        assert!(!missing.contains(&"## Objective"));
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        let h1 = content_hash("hello");
        let h2 = content_hash("hello");
        let h3 = content_hash("hello!");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 16);
    }
}
