// Error types for orchestration

use gridlab_training::TrainingError;
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Rejected before any run was created
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage id did not resolve to a saved model
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Unknown run, channel or image
    #[error("Not found: {0}")]
    NotFound(String),

    /// Submission queue is at capacity
    #[error("Job queue is full ({capacity} pending jobs)")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Workers have shut down
    #[error("Job executor has stopped")]
    ExecutorStopped,

    /// Background task died before returning
    #[error("Task aborted: {0}")]
    Aborted(String),

    /// Invalid configuration file or environment value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store or pipeline failure
    #[error(transparent)]
    Training(TrainingError),
}

impl From<TrainingError> for OrchestrationError {
    fn from(err: TrainingError) -> Self {
        match err {
            TrainingError::Validation(msg) => Self::Validation(msg),
            TrainingError::ModelNotFound(id) => Self::ModelNotFound(id),
            TrainingError::NotFound(what) => Self::NotFound(what),
            TrainingError::RunNotFound(id) => Self::NotFound(format!("run {id}")),
            other => Self::Training(other),
        }
    }
}
