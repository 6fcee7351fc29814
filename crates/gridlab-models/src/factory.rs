//! Model factory for constructing and restoring backends.
//!
//! Construction dispatches on [`BackendKind`] once; after that callers only see
//! `Box<dyn ModelBackend>`. Loading reads the blob header to pick the backend.

use crate::blob::read_header;
use crate::{BoostedTreeModel, LinearModel, RandomForestModel};
use gridlab_abstraction::{BackendKind, ModelBackend, ModelError, ModelResult, TaskKind};
use std::path::Path;
use tracing::debug;

/// Factory for creating model instances.
pub struct ModelFactory;

impl ModelFactory {
    /// Creates an untrained backend for the given kind and task.
    #[must_use]
    pub fn create(kind: BackendKind, task: TaskKind) -> Box<dyn ModelBackend> {
        debug!(backend = %kind, task = %task, "Creating model backend");
        match kind {
            BackendKind::BoostedTree => Box::new(BoostedTreeModel::new(task)),
            BackendKind::RandomForest => Box::new(RandomForestModel::new(task)),
            BackendKind::Linear => Box::new(LinearModel::new(task)),
        }
    }

    /// Restores a trained backend from blob bytes.
    ///
    /// # Errors
    /// Returns `ModelError::Serialization` if the bytes are not a model blob.
    pub fn from_blob(bytes: &[u8]) -> ModelResult<Box<dyn ModelBackend>> {
        let header = read_header(bytes)?;
        let model: Box<dyn ModelBackend> = match header.kind {
            BackendKind::BoostedTree => Box::new(BoostedTreeModel::from_blob(bytes)?),
            BackendKind::RandomForest => Box::new(RandomForestModel::from_blob(bytes)?),
            BackendKind::Linear => Box::new(LinearModel::from_blob(bytes)?),
        };
        Ok(model)
    }

    /// Loads a model saved with [`ModelBackend::save`], detecting its kind.
    pub fn load(path: &Path) -> ModelResult<Box<dyn ModelBackend>> {
        let bytes = read(path)?;
        debug!(path = %path.display(), "Loading model");
        Self::from_blob(&bytes)
    }

    /// Reads only enough of a saved model to report its backend and task.
    pub fn detect(path: &Path) -> ModelResult<(BackendKind, TaskKind)> {
        let header = read_header(&read(path)?)?;
        Ok((header.kind, header.task))
    }
}

fn read(path: &Path) -> ModelResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| ModelError::Io(format!("{}: {e}", path.display())))
}
