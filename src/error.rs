use crate::domain::entities::{JobPriority, JobStatus};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Queue is full for {priority:?} priority (max: {capacity})")]
    QueueFull {
        priority: JobPriority,
        capacity: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Processing failed: {0}")]
    ProcessingFailure(String),

    #[error("Persistence error: {0}")]
    PersistenceFailure(String),

    #[error("Startup failed: {0}")]
    StartupFailure(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

// Add From implementations for common error types
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::PersistenceFailure(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::PersistenceFailure(format!("JSON error: {}", err))
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::ValidationError(format!("CSV error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
