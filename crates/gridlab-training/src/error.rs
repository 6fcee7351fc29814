use gridlab_abstraction::ModelError;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    /// Malformed or missing input: absent dataset or label column, non-CSV file,
    /// empty dataset, non-numeric cell, bad split parameters.
    #[error("validation error: {0}")]
    Validation(String),

    /// Writing an artifact set failed; the latest pointer was not redirected.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Unknown channel content or image name.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("run {run_id} cannot move from {from} to {to}")]
    InvalidTransition { run_id: String, from: String, to: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
