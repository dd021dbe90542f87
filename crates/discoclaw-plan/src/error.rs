use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    /// A plan's content hash no longer matches the hash recorded in its
    /// phases sidecar.
    #[error("Plan file has changed since phases were generated; run `!plan phases --regenerate`")]
    Stale,

    /// A failed phase retry was attempted without the required retry-safety
    /// records, or git is unavailable to perform the revert.
    #[error("retry blocked: {0}")]
    RetryBlocked(String),

    /// A plan-phase write or close transition is already in flight.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// The phases sidecar (or its markdown fallback) could not be parsed.
    #[error("corrupt phases state: {0}")]
    CorruptState(String),

    #[error("runtime error: {0}")]
    Runtime(#[from] discoclaw_runtime::RuntimeError),

    #[error("task store error: {0}")]
    Task(#[from] discoclaw_tasks::TaskError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PlanError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::Stale => "plan_stale",
            PlanError::RetryBlocked(_) => "plan_retry_blocked",
            PlanError::Concurrency(_) => "plan_concurrency",
            PlanError::CorruptState(_) => "plan_corrupt_state",
            PlanError::Runtime(_) => "plan_runtime",
            PlanError::Task(_) => "plan_task",
            PlanError::Io(_) => "plan_io",
            PlanError::Serialization(_) => "plan_serialization",
            PlanError::Other(_) => "plan_other",
        }
    }
}

pub type Result<T> = std::result::Result<T, PlanError>;
