use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("chat adapter error: {0}")]
    Adapter(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("required persona context directory missing: {0}")]
    MissingContextDir(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
