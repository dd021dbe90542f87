use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory item not found: {id}")]
    NotFound { id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryError {
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::NotFound { .. } => "memory_not_found",
            MemoryError::Io(_) => "memory_io",
            MemoryError::Serialization(_) => "memory_serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
