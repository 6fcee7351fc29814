//! Tabular dataset loading.
//!
//! A dataset reference is a bare `*.csv` file name inside the datasets directory.
//! Columns named in the [`DatasetSchema`] are metadata and never reach a model; the
//! label column is split off; every remaining column is a numeric feature.

use crate::error::{TrainingError, TrainingResult};
use gridlab_abstraction::{FeatureMatrix, Samples};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Columns that describe a row rather than measure it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSchema {
    metadata_columns: Vec<String>,
}

impl DatasetSchema {
    #[must_use]
    pub fn new(metadata_columns: Vec<String>) -> Self {
        Self { metadata_columns }
    }

    #[must_use]
    pub fn metadata_columns(&self) -> &[String] {
        &self.metadata_columns
    }

    #[must_use]
    pub fn is_metadata(&self, column: &str) -> bool {
        self.metadata_columns.iter().any(|c| c == column)
    }
}

impl Default for DatasetSchema {
    fn default() -> Self {
        Self::new(vec!["dataset_id".to_string(), "log_id".to_string(), "timestamp".to_string()])
    }
}

/// Features of a dataset, with labels when the label column is present.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDataset {
    pub features: FeatureMatrix,
    pub labels: Option<Vec<f64>>,
}

/// Loads a dataset reference into a feature matrix and label vector.
pub trait DatasetLoader: Send + Sync + fmt::Debug {
    /// Pre-submission check: the dataset exists, has the label column, and every row
    /// parses. Returns the row count.
    fn check(&self, dataset: &str, label_column: &str) -> TrainingResult<usize> {
        Ok(self.load(dataset, label_column)?.len())
    }

    /// Load features, tolerating a missing label column.
    fn load_features(&self, dataset: &str, label_column: &str) -> TrainingResult<LoadedDataset>;

    /// Available dataset references.
    fn list(&self) -> TrainingResult<Vec<String>>;

    /// Load features and labels; the label column must exist.
    fn load(&self, dataset: &str, label_column: &str) -> TrainingResult<Samples> {
        let loaded = self.load_features(dataset, label_column)?;
        let labels = loaded
            .labels
            .ok_or_else(|| TrainingError::Validation(format!("label column '{label_column}' not found in {dataset}")))?;
        Ok(Samples::new(loaded.features, labels)?)
    }
}

/// CSV files in a single directory.
#[derive(Debug, Clone)]
pub struct CsvDatasetLoader {
    root: PathBuf,
    schema: DatasetSchema,
}

impl CsvDatasetLoader {
    #[must_use]
    pub fn new(root: PathBuf, schema: DatasetSchema) -> Self {
        Self { root, schema }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    fn resolve(&self, dataset: &str) -> TrainingResult<PathBuf> {
        let name = dataset.trim();
        if name.is_empty() {
            return Err(TrainingError::Validation("dataset reference is empty".to_string()));
        }
        if name.contains(['/', '\\']) || name == ".." || name.starts_with('.') {
            return Err(TrainingError::Validation(format!("'{name}' is not a dataset file name")));
        }
        if !name.to_ascii_lowercase().ends_with(".csv") {
            return Err(TrainingError::Validation(format!("dataset '{name}' must be a .csv file")));
        }
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(TrainingError::Validation(format!("dataset '{name}' not found in {}", self.root.display())));
        }
        Ok(path)
    }

    fn reader(path: &Path) -> TrainingResult<csv::Reader<std::fs::File>> {
        Ok(csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?)
    }
}

fn parse_cell(raw: &str, row: usize, column: &str) -> TrainingResult<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| TrainingError::Validation(format!("row {row}, column '{column}': '{raw}' is not a number")))
}

impl DatasetLoader for CsvDatasetLoader {
    fn load_features(&self, dataset: &str, label_column: &str) -> TrainingResult<LoadedDataset> {
        let path = self.resolve(dataset)?;
        let mut reader = Self::reader(&path)?;
        let headers = reader.headers()?.clone();

        let label_idx = headers.iter().position(|h| h == label_column);
        let feature_cols: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(idx, name)| Some(*idx) != label_idx && !self.schema.is_metadata(name))
            .map(|(idx, name)| (idx, name.to_string()))
            .collect();
        if feature_cols.is_empty() {
            return Err(TrainingError::Validation(format!("{dataset} has no feature columns")));
        }

        let mut rows = Vec::new();
        let mut labels = label_idx.map(|_| Vec::new());
        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            let row_no = row_idx + 1;
            let row = feature_cols
                .iter()
                .map(|(idx, name)| parse_cell(record.get(*idx).unwrap_or(""), row_no, name))
                .collect::<TrainingResult<Vec<f64>>>()?;
            rows.push(row);
            if let (Some(idx), Some(labels)) = (label_idx, labels.as_mut()) {
                labels.push(parse_cell(record.get(idx).unwrap_or(""), row_no, label_column)?);
            }
        }
        if rows.is_empty() {
            return Err(TrainingError::Validation(format!("{dataset} contains no rows")));
        }

        debug!(dataset, rows = rows.len(), features = feature_cols.len(), "Loaded dataset");
        let names = feature_cols.into_iter().map(|(_, name)| name).collect();
        Ok(LoadedDataset { features: FeatureMatrix::new(names, rows)?, labels })
    }

    fn list(&self) -> TrainingResult<Vec<String>> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_file() && name.to_ascii_lowercase().ends_with(".csv") {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }
}
