use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, Result};
use crate::executor::{ExecutorConfig, Job, JobExecutor};
use gridlab_abstraction::{BackendKind, Hyperparameters, TaskKind};
use gridlab_training::{
    Channel, CsvDatasetLoader, DatasetLoader, EvaluationRequest, Pipeline, ProgressSink, PublishedResult,
    RegistryEntry, ReportRenderer, RunHandle, RunId, RunRecord, RunStore, SimulationRow, SvgReportRenderer,
    TracingProgressSink, TrainingRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What `get_result` sees through a channel's latest pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LatestResult {
    /// Nothing published on this channel yet.
    Pending,
    Ready(Box<PublishedResult>),
}

impl LatestResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Backend and task kinds a client may choose from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub backends: Vec<BackendKind>,
    pub tasks: Vec<TaskKind>,
}

/// Entry point for submitting runs and reading their published results.
///
/// Submissions validate synchronously and return a handle at once; the work itself
/// happens on the executor's workers.
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<RunStore>,
    pipeline: Pipeline,
    executor: JobExecutor,
}

impl Orchestrator {
    /// Build an orchestrator with the CSV loader, SVG renderer and tracing progress.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let loader = Arc::new(CsvDatasetLoader::new(config.datasets_dir.clone(), config.schema()));
        Self::with_components(config, loader, Arc::new(SvgReportRenderer), Arc::new(TracingProgressSink))
    }

    pub fn with_components(
        config: OrchestratorConfig,
        loader: Arc<dyn DatasetLoader>,
        renderer: Arc<dyn ReportRenderer>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(RunStore::open(&config.results_dir)?);
        let pipeline = Pipeline::new(loader, renderer, progress);
        let executor = JobExecutor::start(
            ExecutorConfig {
                workers: config.workers,
                queue_capacity: config.queue_capacity,
                job_timeout: config.job_timeout(),
            },
            Arc::clone(&store),
            pipeline.clone(),
        );
        info!(results_dir = %config.results_dir.display(), datasets_dir = %config.datasets_dir.display(), "Orchestrator ready");
        Ok(Self { config, store, pipeline, executor })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Validate and queue a training run.
    ///
    /// The split settings and every dataset row are checked first; a request that
    /// fails here creates no run.
    pub fn submit_training(
        &self,
        dataset: &str,
        label_column: &str,
        backend: BackendKind,
        task: TaskKind,
        hyperparameters: Hyperparameters,
    ) -> Result<RunHandle> {
        let request = TrainingRequest {
            dataset: dataset.to_string(),
            label_column: label_column.to_string(),
            backend,
            task,
            hyperparameters,
        };
        let rows = self.pipeline.validate_training(&request)?;
        let handle = self.executor.submit(Job::Train(request))?;
        debug!(run_id = %handle.run_id, backend = %backend, task = %task, rows, "Training submitted");
        Ok(handle)
    }

    pub fn submit_evaluation(&self, model_storage_id: &str, dataset: &str, label_column: &str) -> Result<RunHandle> {
        let entry = self.store.resolve_model(model_storage_id)?;
        self.pipeline.loader().check(dataset, label_column)?;
        let handle = self.executor.submit(Job::Evaluate(EvaluationRequest::from_entry(&entry, dataset, label_column)))?;
        debug!(run_id = %handle.run_id, model = %model_storage_id, "Evaluation submitted");
        Ok(handle)
    }

    /// Never blocks on in-flight runs; reports `Pending` until a first publish.
    pub fn get_result(&self, channel: Channel) -> Result<LatestResult> {
        Ok(match self.store.get_latest(channel)? {
            Some(published) => LatestResult::Ready(Box::new(published)),
            None => LatestResult::Pending,
        })
    }

    pub fn fetch_image(&self, channel: Channel, name: &str) -> Result<Vec<u8>> {
        Ok(self.store.fetch_image(channel, name)?)
    }

    pub fn list_registry(&self) -> Result<Vec<RegistryEntry>> {
        Ok(self.store.list_models()?)
    }

    pub fn list_runs(&self) -> Result<Vec<RunRecord>> {
        Ok(self.store.list_runs()?)
    }

    pub fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        Ok(self.store.get_run(run_id)?)
    }

    /// Poll a run until it reaches a terminal status.
    pub async fn wait_for(&self, run_id: &RunId, poll_interval: Duration) -> Result<RunRecord> {
        loop {
            let record = self.get_run(run_id.as_str())?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn options() -> Options {
        Options { backends: BackendKind::ALL.to_vec(), tasks: TaskKind::ALL.to_vec() }
    }

    pub fn list_datasets(&self) -> Result<Vec<String>> {
        Ok(self.pipeline.loader().list()?)
    }

    /// Row-by-row predictions of a saved model. Creates no run.
    pub async fn simulate(&self, model_storage_id: &str, dataset: &str, label_column: &str) -> Result<Vec<SimulationRow>> {
        let entry = self.store.resolve_model(model_storage_id)?;
        let pipeline = self.pipeline.clone();
        let (dataset, label_column) = (dataset.to_string(), label_column.to_string());
        let limit = self.config.simulate_row_limit;
        let rows = tokio::task::spawn_blocking(move || pipeline.simulate(&entry.path, &dataset, &label_column, limit))
            .await
            .map_err(|e| OrchestrationError::Aborted(format!("simulation: {e}")))??;
        Ok(rows)
    }

    /// Stop accepting work and wait for queued runs to finish.
    pub async fn shutdown(self) {
        self.executor.shutdown().await;
    }
}
