//! `cron-run-stats.json` — run history and counters, one entry per job id,
//! persisted separately from the job registry itself (spec.md §3, §6).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;

use crate::error::Result;
use crate::types::{JobRunStats, RunRecord, RunResult, RunStatsFile};

pub struct RunStatsStore {
    path: PathBuf,
    state: Mutex<RunStatsFile>,
}

impl RunStatsStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt cron-run-stats.json, starting empty");
                RunStatsFile::default()
            }),
            Err(_) => RunStatsFile::default(),
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Append a completed run and update the running totals.
    pub fn record(&self, job_id: &str, started_at: chrono::DateTime<Utc>, result: RunResult) -> Result<()> {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        let mut state = self.state.lock().expect("run-stats lock poisoned");
        let entry = match state.jobs.iter_mut().find(|j| j.id == job_id) {
            Some(e) => e,
            None => {
                state.jobs.push(JobRunStats {
                    id: job_id.to_string(),
                    ..Default::default()
                });
                state.jobs.last_mut().unwrap()
            }
        };
        entry.runs.push(RunRecord {
            started_at,
            ended_at,
            result,
            duration_ms,
        });
        entry.total_runs += 1;
        if result == RunResult::Failure {
            entry.total_failures += 1;
        }
        self.persist_locked(&state)
    }

    pub fn stats_for(&self, job_id: &str) -> Option<JobRunStats> {
        self.state
            .lock()
            .expect("run-stats lock poisoned")
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
    }

    fn persist_locked(&self, state: &RunStatsFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        atomic_write(&self.path, &content)
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_totals() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStatsStore::load(dir.path().join("cron-run-stats.json"));
        let start = Utc::now();
        store.record("job-1", start, RunResult::Success).unwrap();
        store.record("job-1", start, RunResult::Failure).unwrap();

        let stats = store.stats_for("job-1").unwrap();
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.runs.len(), 2);
    }

    #[test]
    fn persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cron-run-stats.json");
        {
            let store = RunStatsStore::load(&path);
            store.record("job-1", Utc::now(), RunResult::Success).unwrap();
        }
        let reloaded = RunStatsStore::load(&path);
        assert_eq!(reloaded.stats_for("job-1").unwrap().total_runs, 1);
    }
}
