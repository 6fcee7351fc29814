//! Model backend abstraction layer for GridLab.
//!
//! This crate defines the capability contract every model backend implements
//! (`fit`, `predict`, `save`, `feature_importance`) together with the value
//! types that flow through it. Concrete backends live in `gridlab-models`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Represents an error raised by a model backend.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// A task/backend combination is missing a required (usually derived) parameter,
    /// or a hyperparameter has the wrong type.
    #[error("Configuration Error: {0}")]
    Configuration(String),

    /// Inference was attempted before `fit` or `load`.
    #[error("Model has not been trained or loaded")]
    NotTrained,

    /// The backend does not offer the requested capability.
    #[error("Unsupported Operation: {0}")]
    UnsupportedOperation(String),

    /// The input data does not match what the model expects.
    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// The persisted model blob could not be encoded or decoded.
    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// Reading or writing a model blob failed.
    #[error("IO Error: {0}")]
    Io(String),

    /// Training stopped because its [`CancelToken`] was triggered.
    #[error("Training cancelled")]
    Cancelled,
}

/// Result alias used by backends.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Cooperative stop flag shared between a run's owner and its training loop.
///
/// Clones share the same flag. Iterative backends poll it between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(ModelError::Cancelled)` once cancelled.
    pub fn check(&self) -> ModelResult<()> {
        if self.is_cancelled() { Err(ModelError::Cancelled) } else { Ok(()) }
    }
}

/// Which modeling algorithm family produced (or will produce) a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    BoostedTree,
    RandomForest,
    Linear,
}

impl BackendKind {
    /// All backend kinds, in display order.
    pub const ALL: [Self; 3] = [Self::BoostedTree, Self::RandomForest, Self::Linear];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BoostedTree => "boosted_tree",
            Self::RandomForest => "random_forest",
            Self::Linear => "linear",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "boosted_tree" | "xgboost" | "gbt" => Ok(Self::BoostedTree),
            "random_forest" | "rf" => Ok(Self::RandomForest),
            "linear" => Ok(Self::Linear),
            other => Err(ModelError::InvalidInput(format!("unknown backend kind: {other}"))),
        }
    }
}

/// The learning objective shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Regression,
    Binary,
    Multiclass,
}

impl TaskKind {
    /// All task kinds, in display order.
    pub const ALL: [Self; 3] = [Self::Multiclass, Self::Binary, Self::Regression];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regression => "regression",
            Self::Binary => "binary",
            Self::Multiclass => "multiclass",
        }
    }

    #[must_use]
    pub fn is_classification(&self) -> bool {
        matches!(self, Self::Binary | Self::Multiclass)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "regression" => Ok(Self::Regression),
            "binary" | "classification" | "binary_classification" => Ok(Self::Binary),
            "multiclass" | "multiclass_classification" => Ok(Self::Multiclass),
            other => Err(ModelError::InvalidInput(format!("unknown task kind: {other}"))),
        }
    }
}

/// A single hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Infer a typed value from its textual form (`true`, `4`, `0.3`, anything else is text).
    #[must_use]
    pub fn infer(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(b) = raw.parse::<bool>() {
            return Self::Bool(b);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Self::Float(f);
        }
        Self::Text(raw.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Open mapping of hyperparameter name to scalar value.
///
/// Backends read the keys they understand and ignore the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters(BTreeMap<String, ParamValue>);

impl Hyperparameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: ParamValue) {
        self.0.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_f64(&self, key: &str, default: f64) -> ModelResult<f64> {
        let value = match self.0.get(key) {
            None => return Ok(default),
            Some(ParamValue::Int(i)) => *i as f64,
            Some(ParamValue::Float(f)) => *f,
            Some(ParamValue::Text(s)) => s.trim().parse::<f64>().map_err(|_| type_error(key, "a number", s))?,
            Some(ParamValue::Bool(b)) => return Err(type_error(key, "a number", &b.to_string())),
        };
        if !value.is_finite() {
            return Err(ModelError::Configuration(format!("hyperparameter '{key}' must be finite")));
        }
        Ok(value)
    }

    pub fn get_usize(&self, key: &str, default: usize) -> ModelResult<usize> {
        match self.0.get(key) {
            None => Ok(default),
            Some(ParamValue::Int(i)) => {
                usize::try_from(*i).map_err(|_| type_error(key, "a non-negative integer", &i.to_string()))
            }
            Some(ParamValue::Float(f)) if *f >= 0.0 && f.fract() == 0.0 => Ok(*f as usize),
            Some(ParamValue::Text(s)) => {
                s.trim().parse::<usize>().map_err(|_| type_error(key, "a non-negative integer", s))
            }
            Some(other) => Err(type_error(key, "a non-negative integer", &other.to_string())),
        }
    }

    /// Like [`Hyperparameters::get_usize`] but `none`/`null` (or absence) means "unbounded".
    pub fn get_opt_usize(&self, key: &str) -> ModelResult<Option<usize>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(s)) if matches!(s.trim().to_ascii_lowercase().as_str(), "" | "none" | "null") => {
                Ok(None)
            }
            Some(_) => self.get_usize(key, 0).map(Some),
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> ModelResult<u64> {
        self.get_usize(key, default as usize).map(|v| v as u64)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> ModelResult<bool> {
        match self.0.get(key) {
            None => Ok(default),
            Some(ParamValue::Bool(b)) => Ok(*b),
            Some(ParamValue::Text(s)) => s.trim().parse::<bool>().map_err(|_| type_error(key, "a boolean", s)),
            Some(other) => Err(type_error(key, "a boolean", &other.to_string())),
        }
    }
}

impl FromIterator<(String, ParamValue)> for Hyperparameters {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn type_error(key: &str, expected: &str, got: &str) -> ModelError {
    ModelError::Configuration(format!("hyperparameter '{key}' must be {expected}, got '{got}'"))
}

/// Dense row-major feature matrix with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    feature_names: Vec<String>,
    values: Vec<f64>,
    n_rows: usize,
}

impl FeatureMatrix {
    /// Build a matrix from rows; every row must have one value per feature name.
    pub fn new(feature_names: Vec<String>, rows: Vec<Vec<f64>>) -> ModelResult<Self> {
        if feature_names.is_empty() {
            return Err(ModelError::InvalidInput("feature matrix needs at least one column".to_string()));
        }
        let n_cols = feature_names.len();
        let n_rows = rows.len();
        let mut values = Vec::with_capacity(n_rows * n_cols);
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != n_cols {
                return Err(ModelError::InvalidInput(format!(
                    "row {idx} has {} values, expected {n_cols}",
                    row.len()
                )));
            }
            values.extend(row);
        }
        Ok(Self { feature_names, values, n_rows })
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.feature_names.len()
    }

    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    #[must_use]
    pub fn row(&self, idx: usize) -> &[f64] {
        let n_cols = self.n_cols();
        &self.values[idx * n_cols..(idx + 1) * n_cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks_exact(self.n_cols())
    }

    #[must_use]
    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.n_cols() + col]
    }

    /// Copy the given rows (in order) into a new matrix.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut values = Vec::with_capacity(indices.len() * self.n_cols());
        for &idx in indices {
            values.extend_from_slice(self.row(idx));
        }
        Self { feature_names: self.feature_names.clone(), values, n_rows: indices.len() }
    }

    /// Fails unless `other` has the same feature names in the same order.
    pub fn check_schema(&self, expected: &[String]) -> ModelResult<()> {
        if self.feature_names.as_slice() != expected {
            return Err(ModelError::InvalidInput(format!(
                "feature columns {:?} do not match the model's {:?}",
                self.feature_names, expected
            )));
        }
        Ok(())
    }
}

/// Features paired with their labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    pub features: FeatureMatrix,
    pub labels: Vec<f64>,
}

impl Samples {
    pub fn new(features: FeatureMatrix, labels: Vec<f64>) -> ModelResult<Self> {
        if features.n_rows() != labels.len() {
            return Err(ModelError::InvalidInput(format!(
                "{} feature rows but {} labels",
                features.n_rows(),
                labels.len()
            )));
        }
        Ok(Self { features, labels })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            features: self.features.select_rows(indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Per-iteration loss values recorded while fitting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    /// Name of the evaluation metric (e.g. `rmse`, `logloss`, `mlogloss`).
    pub metric: String,
    pub train: Vec<f64>,
    #[serde(default)]
    pub eval: Vec<f64>,
}

/// Summary returned by a successful `fit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Number of classes the model was trained with (classification only).
    pub n_classes: Option<usize>,
    /// Iteration kept after early stopping, if the backend is iterative.
    pub best_iteration: Option<usize>,
    pub history: Option<LossHistory>,
}

/// Importance score for one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    pub name: String,
    pub score: f64,
}

/// The capability every model backend offers.
///
/// A backend is constructed for a fixed `(BackendKind, TaskKind)` pair and never
/// re-dispatched on the kind afterwards. Loading a persisted blob is done by
/// `gridlab_models::ModelFactory::load`, which detects the kind from the blob itself.
pub trait ModelBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn task(&self) -> TaskKind;

    fn is_trained(&self) -> bool;

    /// Classes the trained model predicts over; `None` for regression or before `fit`.
    fn n_classes(&self) -> Option<usize>;

    /// Trains in-process. `validation` is used by iterative backends for loss
    /// tracking and early stopping; others ignore it.
    ///
    /// # Errors
    /// Returns `ModelError::Configuration` if a task-specific parameter cannot be derived.
    fn fit(
        &mut self,
        train: &Samples,
        validation: Option<&Samples>,
        params: &Hyperparameters,
    ) -> ModelResult<FitReport>;

    /// Install a flag the training loop polls; backends without a loop ignore it.
    fn set_cancel_token(&mut self, _token: CancelToken) {}

    /// Binary outputs are 0/1, multiclass outputs are class labels, regression outputs are raw.
    ///
    /// # Errors
    /// Returns `ModelError::NotTrained` before `fit`/`load`.
    fn predict(&self, features: &FeatureMatrix) -> ModelResult<Vec<f64>>;

    /// Encode the trained model as a self-describing blob.
    fn to_blob(&self) -> ModelResult<Vec<u8>>;

    fn save(&self, destination: &Path) -> ModelResult<()> {
        let blob = self.to_blob()?;
        std::fs::write(destination, blob)
            .map_err(|e| ModelError::Io(format!("{}: {e}", destination.display())))
    }

    /// Feature importance, most important first.
    fn feature_importance(&self) -> ModelResult<Vec<FeatureScore>> {
        Err(ModelError::UnsupportedOperation(format!("{} exposes no feature importance", self.kind())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parses_aliases() {
        assert_eq!("xgboost".parse::<BackendKind>().unwrap(), BackendKind::BoostedTree);
        assert_eq!("boosted-tree".parse::<BackendKind>().unwrap(), BackendKind::BoostedTree);
        assert_eq!("random_forest".parse::<BackendKind>().unwrap(), BackendKind::RandomForest);
        assert_eq!("Linear".parse::<BackendKind>().unwrap(), BackendKind::Linear);
        assert!("svm".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_task_kind_accepts_classification_alias() {
        assert_eq!("classification".parse::<TaskKind>().unwrap(), TaskKind::Binary);
        assert_eq!("multiclass".parse::<TaskKind>().unwrap(), TaskKind::Multiclass);
        assert!(TaskKind::Binary.is_classification());
        assert!(!TaskKind::Regression.is_classification());
    }

    #[test]
    fn test_hyperparameters_from_json() {
        let params: Hyperparameters =
            serde_json::from_str(r#"{"max_depth": 4, "eta": 0.1, "verbose": false, "n_estimators": "50"}"#)
                .unwrap();
        assert_eq!(params.get_usize("max_depth", 6).unwrap(), 4);
        assert!((params.get_f64("eta", 0.3).unwrap() - 0.1).abs() < f64::EPSILON);
        assert!(!params.get_bool("verbose", true).unwrap());
        assert_eq!(params.get_usize("n_estimators", 100).unwrap(), 50);
        assert_eq!(params.get_usize("missing", 7).unwrap(), 7);
    }

    #[test]
    fn test_hyperparameters_reject_wrong_types() {
        let params = Hyperparameters::new()
            .with("max_depth", ParamValue::Int(-1))
            .with("eta", ParamValue::Bool(true));
        assert!(matches!(params.get_usize("max_depth", 6), Err(ModelError::Configuration(_))));
        assert!(matches!(params.get_f64("eta", 0.3), Err(ModelError::Configuration(_))));
    }

    #[test]
    fn test_opt_usize_none_text() {
        let params = Hyperparameters::new().with("max_depth", ParamValue::Text("None".to_string()));
        assert_eq!(params.get_opt_usize("max_depth").unwrap(), None);
        let params = Hyperparameters::new().with("max_depth", ParamValue::Int(3));
        assert_eq!(params.get_opt_usize("max_depth").unwrap(), Some(3));
    }

    #[test]
    fn test_param_value_infer() {
        assert_eq!(ParamValue::infer("true"), ParamValue::Bool(true));
        assert_eq!(ParamValue::infer("12"), ParamValue::Int(12));
        assert_eq!(ParamValue::infer("0.5"), ParamValue::Float(0.5));
        assert_eq!(ParamValue::infer("hist"), ParamValue::Text("hist".to_string()));
    }

    #[test]
    fn test_feature_matrix_rejects_ragged_rows() {
        let names = vec!["a".to_string(), "b".to_string()];
        assert!(FeatureMatrix::new(names.clone(), vec![vec![1.0, 2.0], vec![3.0]]).is_err());
        assert!(FeatureMatrix::new(vec![], vec![]).is_err());

        let m = FeatureMatrix::new(names, vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(m.n_rows(), 3);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        let sub = m.select_rows(&[2, 0]);
        assert_eq!(sub.row(0), &[5.0, 6.0]);
        assert_eq!(sub.row(1), &[1.0, 2.0]);
    }

    #[test]
    fn test_samples_length_check() {
        let m = FeatureMatrix::new(vec!["a".to_string()], vec![vec![1.0], vec![2.0]]).unwrap();
        assert!(Samples::new(m.clone(), vec![1.0]).is_err());
        let s = Samples::new(m, vec![0.0, 1.0]).unwrap();
        assert_eq!(s.select(&[1]).labels, vec![1.0]);
    }

    #[test]
    fn test_cancel_token_is_shared_by_clones() {
        let token = CancelToken::new();
        let seen_by_worker = token.clone();
        assert!(seen_by_worker.check().is_ok());
        token.cancel();
        assert!(seen_by_worker.is_cancelled());
        assert_eq!(seen_by_worker.check(), Err(ModelError::Cancelled));
    }
}
