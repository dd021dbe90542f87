use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {id}")]
    NotFound { id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskError {
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::NotFound { .. } => "task_not_found",
            TaskError::Io(_) => "task_io",
            TaskError::Serialization(_) => "task_serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
