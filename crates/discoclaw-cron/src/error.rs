use thiserror::Error;

/// Errors that can occur within the cron subsystem (spec.md §4.8).
#[derive(Debug, Error)]
pub enum CronError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed cron store: {0}")]
    Json(#[from] serde_json::Error),

    /// The provided schedule definition is invalid or unsupported.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given ID exists in the registry.
    #[error("job not found: {id}")]
    JobNotFound { id: String },

    /// Another execution already holds the per-job lock.
    #[error("job {id} is already running")]
    Busy { id: String },
}

pub type Result<T> = std::result::Result<T, CronError>;
