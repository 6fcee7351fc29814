use crate::error::TrainingResult;
use crate::run::{Channel, RunId};
use std::path::{Path, PathBuf};

pub const RECORD_FILE: &str = "run.json";
pub const REPORT_FILE: &str = "evaluation_report.txt";
pub const METRICS_FILE: &str = "metrics.json";
pub const PREDICTIONS_FILE: &str = "predictions.json";
pub const MANIFEST_FILE: &str = "artifact_manifest.json";

/// Filesystem layout of the results root.
///
/// ```text
/// <root>/runs/<run_id>/run.json
/// <root>/runs/<run_id>/model_<run_id>.json
/// <root>/runs/<run_id>/{evaluation_report.txt, metrics.json, predictions.json, *.svg}
/// <root>/runs/<run_id>/artifact_manifest.json
/// <root>/channels/<channel>-latest.json
/// ```
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    #[must_use]
    pub fn channels_dir(&self) -> PathBuf {
        self.root.join("channels")
    }

    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir().join(run_id.as_str())
    }

    #[must_use]
    pub fn record_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join(RECORD_FILE)
    }

    #[must_use]
    pub fn manifest_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join(MANIFEST_FILE)
    }

    #[must_use]
    pub fn pointer_path(&self, channel: Channel) -> PathBuf {
        self.channels_dir().join(format!("{}.json", channel.pointer_name()))
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(self.runs_dir())?;
        std::fs::create_dir_all(self.channels_dir())?;
        Ok(())
    }
}

/// File name of the model blob saved by a training run.
#[must_use]
pub fn model_file_name(run_id: &RunId) -> String {
    format!("model_{run_id}.json")
}
