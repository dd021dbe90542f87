use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job's schedule, as parsed from its forum thread's starter message
/// (spec.md §4.8). Either a 5-field cron expression or `every <duration>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// 5-field cron expression, e.g. `"0 9 * * mon-fri"`.
    Cron { expression: String },
    /// `every <duration>`, stored as whole seconds.
    Every { every_secs: u64 },
}

impl Schedule {
    /// Render back to the source text a thread's starter message would carry.
    pub fn to_source(&self) -> String {
        match self {
            Schedule::Cron { expression } => expression.clone(),
            Schedule::Every { every_secs } => format!("every {every_secs}s"),
        }
    }
}

/// A cron job mirrored from a forum thread (the source of truth, per
/// spec.md §4.8) into the in-memory registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    /// The forum thread id.
    pub id: String,
    pub name: String,
    pub schedule: Schedule,
    /// Thread tags, mapped to categories via the tag-map.
    pub tags: Vec<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    /// The prompt body to invoke the runtime with.
    pub prompt: String,
}

/// One completed (or failed) execution of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub result: RunResult,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Success,
    Failure,
    /// The prior attempt's lock was stale at startup; recorded, not executed.
    Interrupted,
}

/// Run statistics for a single job, persisted in `cron-run-stats.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobRunStats {
    pub id: String,
    pub runs: Vec<RunRecord>,
    pub total_runs: u64,
    pub total_failures: u64,
}

/// On-disk shape of `cron-run-stats.json`: one entry per job id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunStatsFile {
    pub jobs: Vec<JobRunStats>,
}
