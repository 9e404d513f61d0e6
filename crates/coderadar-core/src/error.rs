use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodeRadarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Synthesis failure: {0}")]
    Synthesis(String),

    #[error("Scheduling failure: {0}")]
    Scheduling(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl CodeRadarError {
    /// Errors worth retrying when the failed operation is idempotent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CodeRadarError::Persistence(_) | CodeRadarError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, CodeRadarError>;
