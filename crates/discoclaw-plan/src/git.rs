//! Git snapshot, commit, and revert helpers backing the phase engine's
//! retry-safety and rollback behavior. Every call shells out via
//! `tokio::process::Command`; when git is unavailable (no `.git`, or the
//! binary itself is missing) callers fall back to a content-hash-only
//! notion of retry safety.

use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{PlanError, Result};

async fn run_git(workspace_root: &Path, args: &[&str]) -> std::io::Result<std::process::Output> {
    tokio::process::Command::new("git")
        .args(args)
        .current_dir(workspace_root)
        .output()
        .await
}

/// Whether `workspace_root` is inside a git work tree.
pub async fn is_available(workspace_root: &Path) -> bool {
    match run_git(workspace_root, &["rev-parse", "--is-inside-work-tree"]).await {
        Ok(out) => out.status.success(),
        Err(_) => false,
    }
}

/// Paths with unstaged, staged, or untracked changes relative to HEAD.
pub async fn modified_files(workspace_root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for args in [
        &["diff", "--name-only"][..],
        &["diff", "--staged", "--name-only"][..],
        &["ls-files", "--others", "--exclude-standard"][..],
    ] {
        let out = run_git(workspace_root, args)
            .await
            .map_err(|e| PlanError::Other(format!("git {args:?} failed: {e}")))?;
        if !out.status.success() {
            continue;
        }
        for line in String::from_utf8_lossy(&out.stdout).lines() {
            let line = line.trim();
            if !line.is_empty() && !files.iter().any(|f: &String| f == line) {
                files.push(line.to_string());
            }
        }
    }
    Ok(files)
}

/// Sha256 hex digests of each file's current on-disk content, keyed by path
/// relative to `workspace_root`. Missing files are simply omitted.
pub fn hash_files(workspace_root: &Path, paths: &[String]) -> HashMap<String, String> {
    let mut hashes = HashMap::new();
    for path in paths {
        let full = workspace_root.join(path);
        match std::fs::read(&full) {
            Ok(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                hashes.insert(path.clone(), hex::encode(hasher.finalize()));
            }
            Err(e) => {
                warn!(path = %full.display(), error = %e, "could not hash file for retry-safety record");
            }
        }
    }
    hashes
}

/// Stage everything and commit with `message`. Returns the new commit hash,
/// or `None` if the phase produced no changes to commit.
pub async fn commit_all(workspace_root: &Path, message: &str) -> Result<Option<String>> {
    let add = run_git(workspace_root, &["add", "-A"])
        .await
        .map_err(|e| PlanError::Other(format!("git add failed: {e}")))?;
    if !add.status.success() {
        return Err(PlanError::Other(format!(
            "git add failed: {}",
            String::from_utf8_lossy(&add.stderr)
        )));
    }

    let status = run_git(workspace_root, &["status", "--porcelain"])
        .await
        .map_err(|e| PlanError::Other(format!("git status failed: {e}")))?;
    if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
        return Ok(None);
    }

    let commit = run_git(workspace_root, &["commit", "-m", message])
        .await
        .map_err(|e| PlanError::Other(format!("git commit failed: {e}")))?;
    if !commit.status.success() {
        return Err(PlanError::Other(format!(
            "git commit failed: {}",
            String::from_utf8_lossy(&commit.stderr)
        )));
    }

    let rev = run_git(workspace_root, &["rev-parse", "HEAD"])
        .await
        .map_err(|e| PlanError::Other(format!("git rev-parse failed: {e}")))?;
    Ok(Some(String::from_utf8_lossy(&rev.stdout).trim().to_string()))
}

/// Discard one file's uncommitted changes after a failed phase attempt,
/// leaving HEAD and every other file in the working tree untouched so a
/// single-phase retry can't clobber unrelated work.
pub async fn revert_file(workspace_root: &Path, file: &str) -> Result<()> {
    let checkout = run_git(workspace_root, &["checkout", "--", file])
        .await
        .map_err(|e| PlanError::Other(format!("git checkout failed: {e}")))?;
    if !checkout.status.success() {
        return Err(PlanError::RetryBlocked(format!(
            "git checkout -- {file} failed: {}",
            String::from_utf8_lossy(&checkout.stderr)
        )));
    }
    Ok(())
}

/// Roll the entire working tree back to HEAD after the audit-fix loop is
/// exhausted without a clean verdict.
pub async fn revert_all(workspace_root: &Path) -> Result<()> {
    let checkout = run_git(workspace_root, &["checkout", "."])
        .await
        .map_err(|e| PlanError::Other(format!("git checkout . failed: {e}")))?;
    if !checkout.status.success() {
        return Err(PlanError::RetryBlocked(format!(
            "git checkout . failed: {}",
            String::from_utf8_lossy(&checkout.stderr)
        )));
    }
    let clean = run_git(workspace_root, &["clean", "-fd"])
        .await
        .map_err(|e| PlanError::Other(format!("git clean -fd failed: {e}")))?;
    if !clean.status.success() {
        return Err(PlanError::RetryBlocked(format!(
            "git clean -fd failed: {}",
            String::from_utf8_lossy(&clean.stderr)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn init_repo(dir: &Path) {
        run_git(dir, &["init", "-q"]).await.unwrap();
        run_git(dir, &["config", "user.email", "test@example.com"]).await.unwrap();
        run_git(dir, &["config", "user.name", "test"]).await.unwrap();
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        run_git(dir, &["add", "-A"]).await.unwrap();
        run_git(dir, &["commit", "-q", "-m", "init"]).await.unwrap();
    }

    #[tokio::test]
    async fn detects_availability() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_available(dir.path()).await);
        init_repo(dir.path()).await;
        assert!(is_available(dir.path()).await);
    }

    #[tokio::test]
    async fn commit_all_returns_none_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let commit = commit_all(dir.path(), "no-op").await.unwrap();
        assert!(commit.is_none());
    }

    #[tokio::test]
    async fn commit_all_commits_new_file() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("src.rs"), "fn main() {}\n").unwrap();
        let commit = commit_all(dir.path(), "phase-1").await.unwrap();
        assert!(commit.is_some());
    }

    #[tokio::test]
    async fn revert_file_discards_only_the_named_file() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("README.md"), "mutated\n").unwrap();
        std::fs::write(dir.path().join("other.md"), "also mutated\n").unwrap();
        run_git(dir.path(), &["add", "-A"]).await.unwrap();
        run_git(dir.path(), &["commit", "-q", "-m", "add other.md"]).await.unwrap();
        std::fs::write(dir.path().join("README.md"), "mutated again\n").unwrap();
        std::fs::write(dir.path().join("other.md"), "mutated again too\n").unwrap();

        revert_file(dir.path(), "README.md").await.unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("README.md")).unwrap(), "mutated\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("other.md")).unwrap(), "mutated again too\n");
    }

    #[test]
    fn hash_files_hashes_existing_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), b"hello").unwrap();
        let hashes = hash_files(dir.path(), &["a.rs".to_string(), "missing.rs".to_string()]);
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains_key("a.rs"));
    }
}
