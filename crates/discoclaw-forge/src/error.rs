use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    /// `run`/`resume` attempted while one is already in flight on this instance.
    #[error("a forge run is already in progress")]
    ConcurrentForge,

    /// `resume` targeted a plan whose header status forbids resuming.
    #[error("{0}")]
    InvalidResumeState(String),

    /// Mandatory plan sections missing on `resume`.
    #[error("structural issues: missing section(s) {0:?}")]
    StructuralIssues(Vec<&'static str>),

    #[error("runtime error: {0}")]
    Runtime(#[from] discoclaw_runtime::RuntimeError),

    #[error("task store error: {0}")]
    Task(#[from] discoclaw_tasks::TaskError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    pub fn code(&self) -> &'static str {
        match self {
            ForgeError::ConcurrentForge => "forge_concurrent",
            ForgeError::InvalidResumeState(_) => "forge_invalid_resume_state",
            ForgeError::StructuralIssues(_) => "forge_structural_issues",
            ForgeError::Runtime(_) => "forge_runtime",
            ForgeError::Task(_) => "forge_task",
            ForgeError::Io(_) => "forge_io",
        }
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
