use crate::artifacts::{ArtifactKind, ArtifactManifest};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::RunLayout;
use crate::run::RunId;
use chrono::{DateTime, Utc};
use gridlab_abstraction::{BackendKind, TaskKind};
use gridlab_models::ModelFactory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A saved model discovered in a completed training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// `<run_id>/<model file name>`; the key callers pass back for evaluation.
    pub storage_id: String,
    pub run_id: RunId,
    pub file_name: String,
    /// Read from the blob header, not from the run record.
    pub backend: BackendKind,
    pub task: TaskKind,
    /// Human readable `"<run folder> - <file>"`.
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

#[must_use]
pub fn storage_id_for(run_id: &RunId, file_name: &str) -> String {
    format!("{run_id}/{file_name}")
}

pub(crate) fn read_manifest(path: &Path) -> TrainingResult<ArtifactManifest> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn entry_for(layout: &RunLayout, manifest: &ArtifactManifest) -> TrainingResult<Option<RegistryEntry>> {
    let Some(model) = manifest.find(ArtifactKind::Model) else {
        return Ok(None);
    };
    let path = layout.run_dir(&manifest.run_id).join(&model.name);
    if !path.is_file() {
        return Ok(None);
    }
    let (backend, task) = ModelFactory::detect(&path)?;
    Ok(Some(RegistryEntry {
        storage_id: storage_id_for(&manifest.run_id, &model.name),
        run_id: manifest.run_id.clone(),
        file_name: model.name.clone(),
        backend,
        task,
        label: format!("{} - {}", manifest.run_id, model.name),
        created_at: manifest.completed_at,
        path,
    }))
}

/// Scan completed runs (those with a manifest) for saved model blobs.
pub fn discover_models(layout: &RunLayout) -> TrainingResult<Vec<RegistryEntry>> {
    let mut out = Vec::new();
    let dir = match std::fs::read_dir(layout.runs_dir()) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    for entry in dir {
        let run_dir = entry?.path();
        let manifest_path = run_dir.join(crate::layout::MANIFEST_FILE);
        if !manifest_path.is_file() {
            continue;
        }
        let found = read_manifest(&manifest_path).and_then(|manifest| entry_for(layout, &manifest));
        match found {
            Ok(Some(model)) => out.push(model),
            Ok(None) => {}
            Err(e) => warn!(run_dir = %run_dir.display(), error = %e, "Skipping unreadable run"),
        }
    }

    out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.storage_id.cmp(&b.storage_id)));
    Ok(out)
}

/// Resolve a storage id to its registry entry.
pub fn resolve_model(layout: &RunLayout, storage_id: &str) -> TrainingResult<RegistryEntry> {
    let not_found = || TrainingError::ModelNotFound(storage_id.to_string());
    let (run_part, file_part) = storage_id.split_once('/').ok_or_else(not_found)?;
    let run_id = RunId::parse(run_part).map_err(|_| not_found())?;
    if file_part.contains(['/', '\\']) || !file_part.starts_with("model_") {
        return Err(not_found());
    }

    let manifest_path = layout.manifest_path(&run_id);
    if !manifest_path.is_file() {
        return Err(not_found());
    }
    let manifest = read_manifest(&manifest_path)?;
    match entry_for(layout, &manifest)? {
        Some(entry) if entry.file_name == file_part => Ok(entry),
        _ => Err(not_found()),
    }
}
