//! Run store: the only writer of run-level state on disk.
//!
//! Every run gets its own directory, created exclusively so an id is never reused.
//! A successful run writes all of its artifacts, then its manifest, then its
//! `succeeded` record, and only then redirects the channel's latest pointer with a
//! single temp-file-and-rename. Readers that follow a pointer therefore always find a
//! complete artifact set belonging to a finished run.

use crate::artifacts::{
    ArtifactEntry, ArtifactKind, ArtifactManifest, ArtifactSet, LatestPointer, PublishedResult, sha256_bytes,
};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::{self, RunLayout};
use crate::registry::{self, RegistryEntry};
use crate::run::{Channel, RunHandle, RunId, RunRecord, RunRequest, RunStatus};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_ID_ATTEMPTS: usize = 16;

#[derive(Debug)]
pub struct RunStore {
    layout: RunLayout,
    /// Serializes latest-pointer redirects.
    publish_lock: Mutex<()>,
}

/// Write `bytes` to a sibling temp file, flush it to disk, then rename over `path`.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let temp_path = path.with_file_name(format!("{stem}.tmp.{}", Uuid::new_v4()));

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_durable(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn persistence(path: &Path, err: &std::io::Error) -> TrainingError {
    TrainingError::Persistence(format!("{}: {err}", path.display()))
}

fn to_json<T: Serialize>(value: &T) -> TrainingResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

/// Image names must be plain file names that cannot shadow the fixed artifacts.
fn check_image_name(name: &str) -> TrainingResult<()> {
    let reserved = [
        layout::RECORD_FILE,
        layout::REPORT_FILE,
        layout::METRICS_FILE,
        layout::PREDICTIONS_FILE,
        layout::MANIFEST_FILE,
    ];
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) || reserved.contains(&name) || name.starts_with("model_") {
        return Err(TrainingError::Persistence(format!("invalid image name '{name}'")));
    }
    Ok(())
}

impl RunStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> TrainingResult<Self> {
        let layout = RunLayout::new(root.into());
        layout.ensure_dirs()?;
        Ok(Self { layout, publish_lock: Mutex::new(()) })
    }

    #[must_use]
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Allocate a fresh run directory and record the run as `pending`.
    pub fn begin_run(&self, request: RunRequest) -> TrainingResult<RunHandle> {
        fs::create_dir_all(self.layout.runs_dir())?;
        let mut attempts = 0;
        let run_id = loop {
            let candidate = RunId::generate();
            match fs::create_dir(self.layout.run_dir(&candidate)) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempts < MAX_ID_ATTEMPTS => attempts += 1,
                Err(e) => return Err(persistence(&self.layout.run_dir(&candidate), &e)),
            }
        };

        let channel = request.kind.channel();
        let record = RunRecord {
            run_id: run_id.clone(),
            request,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        self.write_record(&record)?;
        debug!(run_id = %run_id, channel = %channel, "Run created");
        Ok(RunHandle { run_id, channel })
    }

    pub fn mark_running(&self, handle: &RunHandle) -> TrainingResult<RunRecord> {
        self.transition(handle, &[RunStatus::Pending], RunStatus::Running, |record| {
            record.started_at = Some(Utc::now());
        })
    }

    /// Persist the artifact set, record the run as succeeded, then publish it as the
    /// channel's latest.
    ///
    /// The pointer moves last, so whatever it names is already `succeeded`. If writing
    /// artifacts fails the run is still `running` and the caller should mark it failed.
    /// If the pointer redirect itself fails the run is recorded `failed` here and the
    /// pointer is left where it was.
    pub fn mark_succeeded(&self, handle: &RunHandle, artifacts: ArtifactSet) -> TrainingResult<RunRecord> {
        let record = self.get_run(handle.run_id.as_str())?;
        if record.status != RunStatus::Running {
            return Err(invalid_transition(&record, RunStatus::Succeeded));
        }

        let manifest = self.write_artifacts(&handle.run_id, handle.channel, artifacts)?;
        let manifest_path = self.layout.manifest_path(&handle.run_id);
        atomic_write(&manifest_path, &to_json(&manifest)?).map_err(|e| persistence(&manifest_path, &e))?;

        let record = self.transition(handle, &[RunStatus::Running], RunStatus::Succeeded, |record| {
            record.completed_at = Some(manifest.completed_at);
        })?;

        if let Err(e) = self.publish(handle.channel, &handle.run_id) {
            // Not linked, so not published: the record must not claim otherwise.
            let message = format!("publish failed: {e}");
            self.transition(handle, &[RunStatus::Succeeded], RunStatus::Failed, |record| {
                record.completed_at = Some(Utc::now());
                record.error = Some(message);
            })?;
            return Err(e);
        }
        info!(run_id = %handle.run_id, channel = %handle.channel, "Run published");
        Ok(record)
    }

    /// Record a failure. Allowed from `pending` (never started) or `running`.
    pub fn mark_failed(&self, handle: &RunHandle, error: &str) -> TrainingResult<RunRecord> {
        self.transition(handle, &[RunStatus::Pending, RunStatus::Running], RunStatus::Failed, |record| {
            record.completed_at = Some(Utc::now());
            record.error = Some(error.to_string());
        })
    }

    pub fn get_run(&self, run_id: &str) -> TrainingResult<RunRecord> {
        let run_id = RunId::parse(run_id)?;
        let path = self.layout.record_path(&run_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TrainingError::RunNotFound(run_id.0)),
            Err(e) => Err(e.into()),
        }
    }

    /// All runs with a readable record, oldest first.
    pub fn list_runs(&self) -> TrainingResult<Vec<RunRecord>> {
        let dir = match fs::read_dir(self.layout.runs_dir()) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        for entry in dir {
            let path = entry?.path().join(layout::RECORD_FILE);
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                // Directory claimed but record not written yet.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<RunRecord>(&bytes) {
                Ok(record) => runs.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run record"),
            }
        }
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    /// The artifact set the channel's pointer names, or `None` before the first publish.
    pub fn get_latest(&self, channel: Channel) -> TrainingResult<Option<PublishedResult>> {
        let Some(pointer) = self.read_pointer(channel)? else {
            return Ok(None);
        };
        let manifest_path = self.layout.manifest_path(&pointer.run_id);
        let manifest = match registry::read_manifest(&manifest_path) {
            Ok(m) => m,
            Err(TrainingError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                warn!(channel = %channel, run_id = %pointer.run_id, "Latest pointer names a run without a manifest");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let report = match manifest.find(ArtifactKind::Report) {
            Some(entry) => String::from_utf8_lossy(&self.read_artifact(&pointer.run_id, entry)?).into_owned(),
            None => String::new(),
        };
        let metrics = match manifest.find(ArtifactKind::Metrics) {
            Some(entry) => serde_json::from_slice(&self.read_artifact(&pointer.run_id, entry)?)?,
            None => crate::metrics::Metrics::default(),
        };

        Ok(Some(PublishedResult {
            run: self.get_run(pointer.run_id.as_str())?,
            published_at: pointer.published_at,
            report,
            images: manifest.images().map(|e| e.name.clone()).collect(),
            metrics,
            manifest,
        }))
    }

    /// Bytes of a published image; `name` may omit the `.svg` extension.
    pub fn fetch_image(&self, channel: Channel, name: &str) -> TrainingResult<Vec<u8>> {
        let not_found = || TrainingError::NotFound(format!("image '{name}' in channel {channel}"));
        let pointer = self.read_pointer(channel)?.ok_or_else(not_found)?;
        let manifest = registry::read_manifest(&self.layout.manifest_path(&pointer.run_id))?;
        let entry = manifest
            .images()
            .find(|e| e.name == name || Path::new(&e.name).file_stem().is_some_and(|stem| stem == name))
            .ok_or_else(not_found)?;
        self.read_artifact(&pointer.run_id, entry)
    }

    pub fn list_models(&self) -> TrainingResult<Vec<RegistryEntry>> {
        registry::discover_models(&self.layout)
    }

    pub fn resolve_model(&self, storage_id: &str) -> TrainingResult<RegistryEntry> {
        registry::resolve_model(&self.layout, storage_id)
    }

    fn write_record(&self, record: &RunRecord) -> TrainingResult<()> {
        let path = self.layout.record_path(&record.run_id);
        atomic_write(&path, &to_json(record)?).map_err(|e| persistence(&path, &e))
    }

    fn transition(
        &self,
        handle: &RunHandle,
        from: &[RunStatus],
        to: RunStatus,
        update: impl FnOnce(&mut RunRecord),
    ) -> TrainingResult<RunRecord> {
        let mut record = self.get_run(handle.run_id.as_str())?;
        if !from.contains(&record.status) {
            return Err(invalid_transition(&record, to));
        }
        record.status = to;
        update(&mut record);
        self.write_record(&record)?;
        debug!(run_id = %record.run_id, status = %to, "Run status changed");
        Ok(record)
    }

    fn write_artifacts(&self, run_id: &RunId, channel: Channel, set: ArtifactSet) -> TrainingResult<ArtifactManifest> {
        let dir = self.layout.run_dir(run_id);
        let mut artifacts = Vec::new();
        let mut put = |kind: ArtifactKind, name: String, bytes: &[u8]| -> TrainingResult<()> {
            let path = dir.join(&name);
            write_durable(&path, bytes).map_err(|e| persistence(&path, &e))?;
            artifacts.push(ArtifactEntry::new(kind, name, bytes));
            Ok(())
        };

        if let Some(model) = &set.model {
            put(ArtifactKind::Model, layout::model_file_name(run_id), model)?;
        }
        put(ArtifactKind::Report, layout::REPORT_FILE.to_string(), set.report.as_bytes())?;
        put(ArtifactKind::Metrics, layout::METRICS_FILE.to_string(), &to_json(&set.metrics)?)?;
        put(ArtifactKind::Predictions, layout::PREDICTIONS_FILE.to_string(), &to_json(&set.predictions)?)?;
        for (name, bytes) in &set.images {
            check_image_name(name)?;
            put(ArtifactKind::Image, name.clone(), bytes)?;
        }

        Ok(ArtifactManifest { run_id: run_id.clone(), channel, completed_at: Utc::now(), artifacts })
    }

    fn publish(&self, channel: Channel, run_id: &RunId) -> TrainingResult<()> {
        let path = self.layout.pointer_path(channel);
        let _guard = self
            .publish_lock
            .lock()
            .map_err(|_| TrainingError::Persistence("publish lock poisoned".to_string()))?;
        // Stamped under the lock so publish times follow pointer order.
        let pointer = LatestPointer { run_id: run_id.clone(), published_at: Utc::now() };
        let bytes = to_json(&pointer)?;
        fs::create_dir_all(self.layout.channels_dir()).map_err(|e| persistence(&path, &e))?;
        atomic_write(&path, &bytes).map_err(|e| persistence(&path, &e))
    }

    fn read_pointer(&self, channel: Channel) -> TrainingResult<Option<LatestPointer>> {
        let path = self.layout.pointer_path(channel);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let pointer: LatestPointer = serde_json::from_slice(&bytes)?;
        // The id becomes a path component below.
        if RunId::parse(pointer.run_id.as_str()).is_err() {
            return Err(TrainingError::Persistence(format!(
                "{} names an invalid run id '{}'",
                path.display(),
                pointer.run_id
            )));
        }
        Ok(Some(pointer))
    }

    /// Read an artifact and check it against its manifest digest.
    fn read_artifact(&self, run_id: &RunId, entry: &ArtifactEntry) -> TrainingResult<Vec<u8>> {
        let path = self.layout.run_dir(run_id).join(&entry.name);
        let bytes = fs::read(&path)?;
        if sha256_bytes(&bytes) != entry.sha256 {
            return Err(TrainingError::Persistence(format!("{} does not match its manifest digest", path.display())));
        }
        Ok(bytes)
    }
}

fn invalid_transition(record: &RunRecord, to: RunStatus) -> TrainingError {
    TrainingError::InvalidTransition {
        run_id: record.run_id.to_string(),
        from: record.status.to_string(),
        to: to.to_string(),
    }
}
