use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    #[error("{0}")]
    Message(String),
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            RuntimeError::Message(m) => m,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
