//! Per-job file locks under `<data>/cron/locks/<job-id>` (spec.md §3, §6).
//!
//! A lock's mere presence, keyed by job id, is the at-most-one-execution
//! guarantee across processes. The file content is the lock holder's PID and
//! acquisition time so startup recovery can tell a genuinely stuck lock from
//! one that is merely old-but-active.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::error::{CronError, Result};

pub struct JobLock {
    path: PathBuf,
}

impl JobLock {
    /// Try to acquire the lock for `job_id`. Fails with `Busy` if another
    /// process already holds it.
    pub fn acquire(locks_dir: &Path, job_id: &str) -> Result<Self> {
        std::fs::create_dir_all(locks_dir)?;
        let path = locks_dir.join(job_id);

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    CronError::Busy { id: job_id.to_string() }
                } else {
                    CronError::Io(e)
                }
            })?;

        let body = format!("{}\n{}\n", std::process::id(), Utc::now().to_rfc3339());
        file.write_all(body.as_bytes())?;
        Ok(Self { path })
    }

    pub fn release(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove cron lock file");
        }
    }
}

/// At startup, scan `locks_dir` for locks whose acquisition time is older
/// than `heartbeat_secs` and remove them, returning the ids they belonged
/// to so the caller can mark their run-stats entry as interrupted (spec.md
/// §4.8 "Failure recovery").
pub fn recover_stale_locks(locks_dir: &Path, heartbeat_secs: u64) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(locks_dir) else {
        return Vec::new();
    };

    let mut recovered = Vec::new();
    let now = Utc::now();

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(job_id) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let acquired_at = std::fs::read_to_string(&path)
            .ok()
            .and_then(|body| body.lines().nth(1).map(str::to_string))
            .and_then(|ts| chrono::DateTime::parse_from_rfc3339(&ts).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let stale = match acquired_at {
            Some(at) => (now - at).num_seconds() as u64 > heartbeat_secs,
            // Unreadable or malformed lock content — treat as stale rather
            // than leaving an un-recoverable lock behind forever.
            None => true,
        };

        if stale {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(job_id, error = %e, "failed to remove stale cron lock");
                continue;
            }
            warn!(job_id, "recovered stale cron lock from a prior interrupted run");
            recovered.push(job_id.to_string());
        }
    }

    recovered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let lock = JobLock::acquire(dir.path(), "job-1").unwrap();
        let second = JobLock::acquire(dir.path(), "job-1");
        assert!(matches!(second, Err(CronError::Busy { .. })));
        lock.release();
        assert!(JobLock::acquire(dir.path(), "job-1").is_ok());
    }

    #[test]
    fn stale_lock_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job-1");
        let stale_ts = (Utc::now() - chrono::Duration::seconds(10_000)).to_rfc3339();
        std::fs::write(&path, format!("1234\n{stale_ts}\n")).unwrap();

        let recovered = recover_stale_locks(dir.path(), 1800);
        assert_eq!(recovered, vec!["job-1".to_string()]);
        assert!(!path.exists());
    }

    #[test]
    fn fresh_lock_is_not_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let lock = JobLock::acquire(dir.path(), "job-1").unwrap();
        let recovered = recover_stale_locks(dir.path(), 1800);
        assert!(recovered.is_empty());
        lock.release();
    }
}
