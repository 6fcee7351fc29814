//! The synchronous work a run performs: load, fit or load a model, evaluate, render.
//!
//! Nothing here touches the run store. A pipeline returns an [`ArtifactSet`] and the
//! caller decides whether to publish it.

use crate::artifacts::{ArtifactSet, Predictions};
use crate::dataset::DatasetLoader;
use crate::error::{TrainingError, TrainingResult};
use crate::metrics::{Metrics, evaluate};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::registry::RegistryEntry;
use crate::report::{RenderedReport, ReportInput, ReportRenderer};
use crate::run::{RunId, RunKind, RunRequest};
use gridlab_abstraction::{
    BackendKind, CancelToken, FeatureScore, Hyperparameters, LossHistory, ModelBackend, ModelError, TaskKind,
};
use gridlab_models::{ModelFactory, inject_class_count};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub const TEST_SIZE_PARAM: &str = "test_size";
pub const SEED_PARAM: &str = "seed";
const DEFAULT_TEST_SIZE: f64 = 0.2;
const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub dataset: String,
    pub label_column: String,
    pub backend: BackendKind,
    pub task: TaskKind,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
}

impl TrainingRequest {
    #[must_use]
    pub fn run_request(&self) -> RunRequest {
        RunRequest {
            kind: RunKind::Training,
            backend: self.backend,
            task: self.task,
            hyperparameters: self.hyperparameters.clone(),
            dataset: self.dataset.clone(),
            label_column: self.label_column.clone(),
        }
    }
}

/// Evaluation of a saved model, already resolved through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub source_model: String,
    pub model_path: PathBuf,
    pub backend: BackendKind,
    pub task: TaskKind,
    pub dataset: String,
    pub label_column: String,
}

impl EvaluationRequest {
    #[must_use]
    pub fn from_entry(entry: &RegistryEntry, dataset: impl Into<String>, label_column: impl Into<String>) -> Self {
        Self {
            source_model: entry.storage_id.clone(),
            model_path: entry.path.clone(),
            backend: entry.backend,
            task: entry.task,
            dataset: dataset.into(),
            label_column: label_column.into(),
        }
    }

    #[must_use]
    pub fn run_request(&self) -> RunRequest {
        RunRequest {
            kind: RunKind::Evaluation { source_model: self.source_model.clone() },
            backend: self.backend,
            task: self.task,
            hyperparameters: Hyperparameters::new(),
            dataset: self.dataset.clone(),
            label_column: self.label_column.clone(),
        }
    }
}

/// One row of a simulation: the model's output next to the recorded label, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRow {
    pub row: usize,
    pub predicted: f64,
    pub actual: Option<f64>,
}

/// Split parameters read from a training request's hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitSettings {
    pub test_size: f64,
    pub seed: u64,
}

impl SplitSettings {
    /// Read `test_size` and `seed`; an ill-typed or out-of-range value is a validation error.
    pub fn from_params(params: &Hyperparameters) -> TrainingResult<Self> {
        let invalid = |e: ModelError| TrainingError::Validation(e.to_string());
        let test_size = params.get_f64(TEST_SIZE_PARAM, DEFAULT_TEST_SIZE).map_err(invalid)?;
        let seed = params.get_u64(SEED_PARAM, DEFAULT_SEED).map_err(invalid)?;
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(TrainingError::Validation(format!("{TEST_SIZE_PARAM} must be in (0, 1), got {test_size}")));
        }
        Ok(Self { test_size, seed })
    }

    /// Rows held out from `n`; fails unless both sides end up non-empty.
    pub fn held_out(&self, n: usize) -> TrainingResult<usize> {
        let n_test = (n as f64 * self.test_size).ceil() as usize;
        if n_test == 0 || n_test >= n {
            return Err(TrainingError::Validation(format!(
                "{n} rows cannot be split with {TEST_SIZE_PARAM}={}",
                self.test_size
            )));
        }
        Ok(n_test)
    }
}

/// Shuffle `0..n` with a seeded RNG and cut off the last `ceil(n * test_size)` indices.
///
/// Both sides are guaranteed non-empty.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> TrainingResult<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(TrainingError::Validation(format!("{TEST_SIZE_PARAM} must be in (0, 1), got {test_size}")));
    }
    let n_test = SplitSettings { test_size, seed }.held_out(n)?;

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let test = indices.split_off(n - n_test);
    Ok((indices, test))
}

fn importance_of(model: &dyn ModelBackend) -> TrainingResult<Option<Vec<FeatureScore>>> {
    match model.feature_importance() {
        Ok(scores) => Ok(Some(scores)),
        Err(ModelError::UnsupportedOperation(reason)) => {
            debug!(backend = %model.kind(), reason = %reason, "Skipping feature importance");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Dataset loading and report rendering wired together for the executor.
#[derive(Clone)]
pub struct Pipeline {
    loader: Arc<dyn DatasetLoader>,
    renderer: Arc<dyn ReportRenderer>,
    progress: Arc<dyn ProgressSink>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("loader", &self.loader)
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        loader: Arc<dyn DatasetLoader>,
        renderer: Arc<dyn ReportRenderer>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self { loader, renderer, progress }
    }

    #[must_use]
    pub fn loader(&self) -> &Arc<dyn DatasetLoader> {
        &self.loader
    }

    #[must_use]
    pub fn progress(&self) -> &Arc<dyn ProgressSink> {
        &self.progress
    }

    fn say(&self, run_id: &RunId, message: impl Into<String>) {
        self.progress.on_event(ProgressEvent::Message { run_id: run_id.clone(), message: message.into() });
    }

    /// Check that a training request can be split, reading the dataset in full.
    ///
    /// Returns the dataset's row count. Nothing is fitted.
    pub fn validate_training(&self, request: &TrainingRequest) -> TrainingResult<usize> {
        let split = SplitSettings::from_params(&request.hyperparameters)?;
        let rows = self.loader.check(&request.dataset, &request.label_column)?;
        split.held_out(rows)?;
        Ok(rows)
    }

    /// Fit a fresh backend on a seeded split and score it on the held-out rows.
    ///
    /// `cancel` is polled between steps and by the backend's training loop.
    pub fn train(&self, run_id: &RunId, request: &TrainingRequest, cancel: &CancelToken) -> TrainingResult<ArtifactSet> {
        self.say(run_id, format!("Loading dataset {}", request.dataset));
        let samples = self.loader.load(&request.dataset, &request.label_column)?;
        cancel.check()?;

        // Class count comes from the full label set so both splits agree on it.
        let params = inject_class_count(request.task, &samples.labels, &request.hyperparameters)?;
        let split = SplitSettings::from_params(&params)?;
        let (train_idx, test_idx) = train_test_split(samples.len(), split.test_size, split.seed)?;
        let train = samples.select(&train_idx);
        let test = samples.select(&test_idx);

        self.say(
            run_id,
            format!("Fitting {} ({}) on {} rows, holding out {}", request.backend, request.task, train.len(), test.len()),
        );
        let mut model = ModelFactory::create(request.backend, request.task);
        model.set_cancel_token(cancel.clone());
        let fit = model.fit(&train, Some(&test), &params)?;
        cancel.check()?;

        let predicted = model.predict(&test.features)?;
        let metrics = evaluate(request.task, &test.labels, &predicted, fit.n_classes)?;

        self.say(run_id, "Rendering report");
        let rendered = self.report(model.as_ref(), &test.labels, &predicted, &metrics, fit.history.as_ref(), None)?;

        Ok(ArtifactSet {
            model: Some(model.to_blob()?),
            report: rendered.document,
            images: rendered.images,
            metrics,
            predictions: Predictions { labels: test.labels, predicted },
        })
    }

    /// Score a saved model against a full dataset. Saves no model.
    ///
    /// Labels must be class indices of the saved model for classification tasks.
    pub fn evaluate(
        &self,
        run_id: &RunId,
        request: &EvaluationRequest,
        cancel: &CancelToken,
    ) -> TrainingResult<ArtifactSet> {
        self.say(run_id, format!("Loading model {}", request.source_model));
        let model = ModelFactory::load(&request.model_path)?;
        let samples = self.loader.load(&request.dataset, &request.label_column)?;
        cancel.check()?;

        self.say(run_id, format!("Predicting {} rows", samples.len()));
        let predicted = model.predict(&samples.features)?;
        let metrics = evaluate(model.task(), &samples.labels, &predicted, model.n_classes())?;

        let rendered =
            self.report(model.as_ref(), &samples.labels, &predicted, &metrics, None, Some(request.source_model.as_str()))?;

        Ok(ArtifactSet {
            model: None,
            report: rendered.document,
            images: rendered.images,
            metrics,
            predictions: Predictions { labels: samples.labels, predicted },
        })
    }

    /// Render the report; a backend without importance support just gets no importance chart.
    fn report(
        &self,
        model: &dyn ModelBackend,
        labels: &[f64],
        predicted: &[f64],
        metrics: &Metrics,
        history: Option<&LossHistory>,
        source_model: Option<&str>,
    ) -> TrainingResult<RenderedReport> {
        let importance = importance_of(model)?;
        self.renderer.render(&ReportInput {
            backend: model.kind(),
            task: model.task(),
            labels,
            predicted,
            metrics,
            importance: importance.as_deref(),
            history,
            source_model,
        })
    }

    /// Row-by-row predictions of a saved model, capped at `limit` rows.
    ///
    /// The label column is optional here; `actual` is `None` when it is absent.
    pub fn simulate(
        &self,
        model_path: &std::path::Path,
        dataset: &str,
        label_column: &str,
        limit: usize,
    ) -> TrainingResult<Vec<SimulationRow>> {
        let model = ModelFactory::load(model_path)?;
        let loaded = self.loader.load_features(dataset, label_column)?;
        let predicted = model.predict(&loaded.features)?;

        Ok(predicted
            .into_iter()
            .enumerate()
            .take(limit)
            .map(|(row, predicted)| SimulationRow {
                row,
                predicted,
                actual: loaded.labels.as_ref().and_then(|labels| labels.get(row).copied()),
            })
            .collect())
    }
}
