//! GridLab Training
//!
//! Everything a run needs outside the model itself:
//! - Loading tabular datasets (`DatasetLoader`)
//! - Run identity and lifecycle records (`RunId`, `RunRecord`)
//! - The run store with atomic latest pointers (`RunStore`)
//! - Discovering saved models (`RegistryEntry`)
//! - Metrics, reports and the train/evaluate pipeline

pub mod artifacts;
pub mod dataset;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod report;
pub mod run;
pub mod store;

pub use artifacts::{ArtifactEntry, ArtifactKind, ArtifactManifest, ArtifactSet, LatestPointer, Predictions, PublishedResult};
pub use dataset::{CsvDatasetLoader, DatasetLoader, DatasetSchema, LoadedDataset};
pub use error::{TrainingError, TrainingResult};
pub use layout::RunLayout;
pub use metrics::{ClassScore, Metrics, evaluate};
pub use pipeline::{EvaluationRequest, Pipeline, SimulationRow, SplitSettings, TrainingRequest, train_test_split};
pub use progress::{NullProgressSink, ProgressEvent, ProgressSink, TracingProgressSink};
pub use registry::{RegistryEntry, discover_models, resolve_model, storage_id_for};
pub use report::{RenderedReport, ReportInput, ReportRenderer, SvgReportRenderer};
pub use run::{Channel, RunHandle, RunId, RunKind, RunRecord, RunRequest, RunStatus};
pub use store::RunStore;
