//! Self-describing model blob envelope.
//!
//! Every saved model is a JSON document of the form
//! `{"format": "gridlab-model", "version": 1, "kind": ..., "task": ..., "feature_names": [...], "state": {...}}`.
//! The `kind` tag is what lets a later load detect the backend.

use gridlab_abstraction::{BackendKind, ModelError, ModelResult, TaskKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const BLOB_FORMAT: &str = "gridlab-model";
pub const BLOB_VERSION: u32 = 1;

/// The envelope fields shared by every backend, without the backend state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    pub format: String,
    pub version: u32,
    pub kind: BackendKind,
    pub task: TaskKind,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format: &'a str,
    version: u32,
    kind: BackendKind,
    task: TaskKind,
    feature_names: &'a [String],
    state: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    format: String,
    version: u32,
    kind: BackendKind,
    task: TaskKind,
    feature_names: Vec<String>,
    state: T,
}

pub(crate) fn encode<T: Serialize>(
    kind: BackendKind,
    task: TaskKind,
    feature_names: &[String],
    state: &T,
) -> ModelResult<Vec<u8>> {
    let envelope = EnvelopeRef { format: BLOB_FORMAT, version: BLOB_VERSION, kind, task, feature_names, state };
    serde_json::to_vec(&envelope).map_err(|e| ModelError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(
    bytes: &[u8],
    expected: BackendKind,
) -> ModelResult<(TaskKind, Vec<String>, T)> {
    let envelope: Envelope<T> =
        serde_json::from_slice(bytes).map_err(|e| ModelError::Serialization(e.to_string()))?;
    check_format(&envelope.format, envelope.version)?;
    if envelope.kind != expected {
        return Err(ModelError::Serialization(format!(
            "blob holds a {} model, expected {expected}",
            envelope.kind
        )));
    }
    Ok((envelope.task, envelope.feature_names, envelope.state))
}

/// Read only the envelope header of a blob.
pub fn read_header(bytes: &[u8]) -> ModelResult<BlobHeader> {
    let header: BlobHeader =
        serde_json::from_slice(bytes).map_err(|e| ModelError::Serialization(format!("not a model blob: {e}")))?;
    check_format(&header.format, header.version)?;
    Ok(header)
}

fn check_format(format: &str, version: u32) -> ModelResult<()> {
    if format != BLOB_FORMAT {
        return Err(ModelError::Serialization(format!("unknown blob format '{format}'")));
    }
    if version != BLOB_VERSION {
        return Err(ModelError::Serialization(format!("unsupported blob version {version}")));
    }
    Ok(())
}
