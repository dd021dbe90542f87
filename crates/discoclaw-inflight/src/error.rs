use thiserror::Error;

#[derive(Debug, Error)]
pub enum InFlightError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InFlightError {
    pub fn code(&self) -> &'static str {
        match self {
            InFlightError::Io(_) => "inflight_io",
            InFlightError::Serialization(_) => "inflight_serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, InFlightError>;
