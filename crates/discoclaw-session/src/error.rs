use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {key}")]
    NotFound { key: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound { .. } => "session_not_found",
            SessionError::Io(_) => "session_io",
            SessionError::Serialization(_) => "session_serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
