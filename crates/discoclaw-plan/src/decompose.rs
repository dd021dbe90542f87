//! Pure decomposition of a plan's `## Changes` section into a dependency
//! graph of phases. `decompose` is a pure function of `(plan_content,
//! max_context_files)`: same inputs always yield identical phase ids,
//! titles, groupings, and content hash.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::Utc;
use discoclaw_core::constants::WORKSPACE_ROOT_BASENAMES;
use discoclaw_core::planfile::content_hash;
use regex::Regex;

use crate::types::{Phase, PhaseKind, PlanPhases};

const KNOWN_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "py", "go", "rb", "java", "kt", "c", "h", "cpp", "hpp",
    "cc", "md", "toml", "json", "yaml", "yml", "txt", "sh", "css", "scss", "html", "sql", "proto",
];

fn backtick_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([^`\s]+)`").expect("static regex is valid"))
}

fn changes_section(plan_content: &str) -> String {
    let Some(start) = plan_content.find("## Changes") else {
        return String::new();
    };
    let rest = &plan_content[start + "## Changes".len()..];
    let end = rest
        .match_indices("\n## ")
        .map(|(i, _)| i)
        .next()
        .unwrap_or(rest.len());
    rest[..end].to_string()
}

/// A path candidate is rejected if it's an ALL_CAPS or PascalCase bare
/// identifier (type/constant names quoted in prose, not file paths).
fn looks_like_path(token: &str) -> bool {
    if token.contains('/') {
        return true;
    }
    let has_known_ext = KNOWN_EXTENSIONS
        .iter()
        .any(|ext| token.ends_with(&format!(".{ext}")));
    if !has_known_ext {
        return false;
    }
    let stem = token.rsplit_once('.').map(|(s, _)| s).unwrap_or(token);
    if stem.chars().all(|c| c.is_ascii_uppercase() || c == '_') && stem.chars().any(|c| c.is_ascii_alphabetic()) {
        // ALL_CAPS, e.g. `TODO.FIXME` — reject unless it's a recognized
        // workspace-root basename (those are legitimately ALL_CAPS files).
        return WORKSPACE_ROOT_BASENAMES.iter().any(|b| *b == token);
    }
    let is_pascal_case = stem
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false)
        && stem.chars().all(|c| c.is_ascii_alphanumeric())
        && stem.chars().any(|c| c.is_ascii_lowercase())
        && stem.chars().filter(|c| c.is_ascii_uppercase()).count() >= 2;
    if is_pascal_case && !token.contains('/') {
        return false;
    }
    true
}

/// Try to parse a `Change Manifest` JSON array of file paths out of the
/// `## Changes` section (a fenced code block containing a bare JSON array).
fn parse_change_manifest(section: &str) -> Option<Vec<String>> {
    let fence_start = section.find("```")?;
    let after_open = &section[fence_start + 3..];
    let lang_end = after_open.find('\n')?;
    let body_start = fence_start + 3 + lang_end + 1;
    let body = &section[body_start..];
    let fence_end = body.find("```")?;
    let body = &body[..fence_end];

    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let array = value.as_array()?;
    let paths: Vec<String> = array
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    if paths.is_empty() {
        None
    } else {
        Some(paths)
    }
}

/// Scan bulleted items and bold headings for backtick-enclosed path-like
/// tokens, in document order, deduplicated.
fn scan_backtick_paths(section: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for line in section.lines() {
        let trimmed = line.trim_start();
        let is_candidate_line = trimmed.starts_with('-') || trimmed.starts_with('*') || trimmed.contains("**");
        if !is_candidate_line {
            continue;
        }
        for cap in backtick_token_regex().captures_iter(line) {
            let token = cap[1].to_string();
            if looks_like_path(&token) && seen.insert(token.clone()) {
                out.push(token);
            }
        }
    }
    out
}

/// Extract file paths from the `## Changes` section, deduplicated in
/// first-seen order.
pub fn extract_file_paths(plan_content: &str) -> Vec<String> {
    let section = changes_section(plan_content);
    if section.trim().is_empty() {
        return Vec::new();
    }
    let raw = parse_change_manifest(&section).unwrap_or_else(|| scan_backtick_paths(&section));
    raw.into_iter().map(|p| normalize_path(&p)).collect()
}

/// Known workspace-root basenames are normalized to a `workspace/` prefix
/// when they appear without a path separator.
fn normalize_path(path: &str) -> String {
    if !path.contains('/') && WORKSPACE_ROOT_BASENAMES.iter().any(|b| *b == path) {
        format!("workspace/{path}")
    } else {
        path.to_string()
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn stem(path: &str) -> String {
    let base = basename(path);
    // Strip known test-file suffixes before taking the file stem so
    // `foo.test.ts` and `foo.ts` share a stem of `foo`.
    for suffix in [".test.", ".spec."] {
        if let Some(idx) = base.find(suffix) {
            return base[..idx].to_string();
        }
    }
    base.rsplit_once('.').map(|(s, _)| s.to_string()).unwrap_or_else(|| base.to_string())
}

fn is_test_companion(path: &str) -> bool {
    let base = basename(path);
    base.contains(".test.") || base.contains(".spec.")
}

fn dirname(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Group files: pair `X` with its `X.test.*`/`X.spec.*` companion; otherwise
/// bucket by directory; split buckets larger than `max_context_files`.
fn group_files(paths: &[String], max_context_files: usize) -> Vec<Vec<String>> {
    let mut stem_groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();

    for path in paths {
        let key = format!("{}::{}", dirname(path), stem(path));
        if !stem_groups.contains_key(&key) {
            order.push(key.clone());
        }
        stem_groups.entry(key).or_default().push(path.clone());
    }

    // Any stem group with >1 member is a source+test pair (or more);
    // singleton stem groups fall back to directory bucketing.
    let mut pairs: Vec<Vec<String>> = Vec::new();
    let mut singles: Vec<String> = Vec::new();
    for key in &order {
        let members = &stem_groups[key];
        if members.len() > 1 {
            let mut ordered = members.clone();
            ordered.sort_by_key(|p| is_test_companion(p));
            pairs.push(ordered);
        } else {
            singles.push(members[0].clone());
        }
    }

    let mut dir_buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut dir_order: Vec<String> = Vec::new();
    for path in &singles {
        let dir = dirname(path);
        if !dir_buckets.contains_key(&dir) {
            dir_order.push(dir.clone());
        }
        dir_buckets.entry(dir).or_default().push(path.clone());
    }

    let mut groups: Vec<Vec<String>> = Vec::new();
    groups.extend(pairs);
    for dir in dir_order {
        let bucket = dir_buckets.remove(&dir).unwrap_or_default();
        for chunk in bucket.chunks(max_context_files.max(1)) {
            groups.push(chunk.to_vec());
        }
    }
    groups
}

fn group_title(group: &[String]) -> String {
    if group.len() == 1 {
        return group[0].clone();
    }
    let dir = dirname(&group[0]);
    if !dir.is_empty() && group.iter().all(|p| dirname(p) == dir) {
        format!("{dir}/*")
    } else {
        group.join(", ")
    }
}

/// Decompose `plan_content` into a dependency-ordered phase list.
pub fn decompose(plan_content: &str, plan_id: &str, plan_file: &str, max_context_files: usize) -> PlanPhases {
    let plan_content_hash = content_hash(plan_content);
    let now = Utc::now();
    let paths = extract_file_paths(plan_content);

    let mut phases = Vec::new();

    if paths.is_empty() {
        let read = Phase::new("phase-1", "Read plan", PhaseKind::Read)
            .with_context(vec![plan_file.to_string()]);
        let implement = Phase {
            depends_on: vec!["phase-1".to_string()],
            ..Phase::new("phase-2", "Implement plan", PhaseKind::Implement).with_context(vec![plan_file.to_string()])
        };
        let audit = Phase {
            depends_on: vec!["phase-2".to_string()],
            ..Phase::new("phase-3", "Audit implementation", PhaseKind::Audit).with_context(vec![plan_file.to_string()])
        };
        phases.push(read);
        phases.push(implement);
        phases.push(audit);
    } else {
        let groups = group_files(&paths, max_context_files);
        let mut implement_ids = Vec::new();
        let mut prev_id: Option<String> = None;
        for (i, group) in groups.iter().enumerate() {
            let id = format!("phase-{}", i + 1);
            let mut phase = Phase::new(&id, group_title(group), PhaseKind::Implement).with_context(group.clone());
            if let Some(prev) = &prev_id {
                phase.depends_on.push(prev.clone());
            }
            implement_ids.push(id.clone());
            prev_id = Some(id);
            phases.push(phase);
        }
        let audit_id = format!("phase-{}", groups.len() + 1);
        let audit = Phase {
            depends_on: implement_ids,
            ..Phase::new(&audit_id, "Audit implementation", PhaseKind::Audit).with_context(vec![plan_file.to_string()])
        };
        phases.push(audit);
    }

    PlanPhases {
        version: 1,
        plan_id: plan_id.to_string(),
        plan_file: plan_file.to_string(),
        plan_content_hash,
        phases,
        created_at: now,
        updated_at: now,
    }
}

impl Phase {
    fn with_context(mut self, files: Vec<String>) -> Self {
        self.context_files = files;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_WITH_PAIR: &str = "# Plan: Fix\n**ID:** plan-001\n**Task:** ws-1\n**Status:** DRAFT\n\n\
        ## Objective\nx\n## Scope\nx\n## Changes\n- `src/foo.ts` — add bar\n- `src/foo.test.ts` — add tests\n\
        ## Risks\nx\n## Testing\nx\n## Audit Log\n## Implementation Notes\n";

    #[test]
    fn pairs_source_and_test_file_into_one_implement_phase() {
        let result = decompose(PLAN_WITH_PAIR, "plan-001", "plan-001-fix.md", 5);
        assert_eq!(result.phases.len(), 2);
        assert_eq!(result.phases[0].kind, PhaseKind::Implement);
        assert_eq!(result.phases[0].id, "phase-1");
        assert!(result.phases[0].depends_on.is_empty());
        assert_eq!(
            result.phases[0].context_files,
            vec!["src/foo.ts".to_string(), "src/foo.test.ts".to_string()]
        );
        assert_eq!(result.phases[1].kind, PhaseKind::Audit);
        assert_eq!(result.phases[1].depends_on, vec!["phase-1".to_string()]);
    }

    #[test]
    fn no_file_paths_falls_back_to_read_implement_audit() {
        let plan = "# Plan: Fix\n**ID:** plan-002\n**Task:** ws-1\n**Status:** DRAFT\n\n\
            ## Objective\nx\n## Scope\nx\n## Changes\nGeneral cleanup, no specific files.\n\
            ## Risks\nx\n## Testing\nx\n## Audit Log\n## Implementation Notes\n";
        let result = decompose(plan, "plan-002", "plan-002-fix.md", 5);
        assert_eq!(result.phases.len(), 3);
        assert_eq!(result.phases[0].kind, PhaseKind::Read);
        assert_eq!(result.phases[1].kind, PhaseKind::Implement);
        assert_eq!(result.phases[2].kind, PhaseKind::Audit);
        assert_eq!(result.phases[1].depends_on, vec!["phase-1".to_string()]);
        assert_eq!(result.phases[2].depends_on, vec!["phase-2".to_string()]);
    }

    #[test]
    fn rejects_all_caps_and_pascal_case_identifiers() {
        assert!(!looks_like_path("PascalCaseIdent"));
        assert!(!looks_like_path("CONSTANT_NAME"));
        assert!(looks_like_path("src/foo.rs"));
        assert!(looks_like_path("foo.rs"));
        assert!(looks_like_path("TOOLS.md"));
    }

    #[test]
    fn decomposition_is_deterministic() {
        let a = decompose(PLAN_WITH_PAIR, "plan-001", "plan-001-fix.md", 5);
        let b = decompose(PLAN_WITH_PAIR, "plan-001", "plan-001-fix.md", 5);
        assert_eq!(a.plan_content_hash, b.plan_content_hash);
        assert_eq!(a.phases.len(), b.phases.len());
        for (pa, pb) in a.phases.iter().zip(b.phases.iter()) {
            assert_eq!(pa.id, pb.id);
            assert_eq!(pa.title, pb.title);
            assert_eq!(pa.context_files, pb.context_files);
        }
    }

    #[test]
    fn normalizes_bare_workspace_root_basenames() {
        let plan = "## Changes\n- `MEMORY.md` — update notes\n";
        let paths = extract_file_paths(plan);
        assert_eq!(paths, vec!["workspace/MEMORY.md".to_string()]);
    }

    #[test]
    fn splits_large_directory_buckets() {
        let mut plan = String::from("## Changes\n");
        for i in 0..12 {
            plan.push_str(&format!("- `src/mod{i}.rs` — change\n"));
        }
        let result = decompose(&plan, "plan-003", "plan-003.md", 5);
        // 12 files / max 5 per bucket => 3 implement phases + 1 audit phase.
        assert_eq!(result.phases.len(), 4);
        assert_eq!(result.phases[0].context_files.len(), 5);
        assert_eq!(result.phases[1].context_files.len(), 5);
        assert_eq!(result.phases[2].context_files.len(), 2);
    }

    #[test]
    fn change_manifest_json_array_takes_priority() {
        let plan = "## Changes\nSee manifest:\n```json\n[\"src/a.rs\", \"src/b.rs\"]\n```\n- `NotARealPath` mentioned in prose\n";
        let paths = extract_file_paths(plan);
        assert_eq!(paths, vec!["src/a.rs".to_string(), "src/b.rs".to_string()]);
    }
}
