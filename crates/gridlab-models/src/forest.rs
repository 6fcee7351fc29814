//! Random forest backend: bagged CART trees with per-split feature subsampling.

use crate::blob;
use crate::boosted::ranked;
use crate::labels::{argmax, resolve_class_count, threshold};
use crate::tree::{grow, GiniCriterion, GrowParams, Tree, VarianceCriterion};
use gridlab_abstraction::{
    BackendKind, CancelToken, FeatureMatrix, FeatureScore, FitReport, Hyperparameters, ModelBackend, ModelError, ModelResult,
    ParamValue, Samples, TaskKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ForestState {
    n_classes: Option<usize>,
    trees: Vec<Tree>,
    /// Per-tree normalized impurity decrease, averaged over trees.
    importances: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    Count(usize),
    Fraction(f64),
}

impl MaxFeatures {
    fn parse(params: &Hyperparameters, task: TaskKind) -> ModelResult<Self> {
        let Some(value) = params.get("max_features") else {
            return Ok(if task.is_classification() { Self::Sqrt } else { Self::All });
        };
        let invalid = || ModelError::Configuration(format!("max_features cannot be '{value}'"));
        match value {
            ParamValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "sqrt" | "auto" => Ok(Self::Sqrt),
                "log2" => Ok(Self::Log2),
                "all" | "none" | "null" => Ok(Self::All),
                _ => Err(invalid()),
            },
            ParamValue::Int(n) if *n >= 1 => Ok(Self::Count(*n as usize)),
            ParamValue::Float(f) if *f > 0.0 && *f <= 1.0 => Ok(Self::Fraction(*f)),
            _ => Err(invalid()),
        }
    }

    fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            Self::All => n_features,
            Self::Sqrt => n.sqrt() as usize,
            Self::Log2 => n.log2() as usize,
            Self::Count(k) => k,
            Self::Fraction(f) => (f * n) as usize,
        };
        k.clamp(1, n_features)
    }
}

/// Random forest backend.
#[derive(Debug, Clone)]
pub struct RandomForestModel {
    task: TaskKind,
    feature_names: Vec<String>,
    state: Option<ForestState>,
    cancel: CancelToken,
}

impl RandomForestModel {
    #[must_use]
    pub fn new(task: TaskKind) -> Self {
        Self { task, feature_names: Vec::new(), state: None, cancel: CancelToken::new() }
    }

    pub fn from_blob(bytes: &[u8]) -> ModelResult<Self> {
        let (task, feature_names, state) = blob::decode(bytes, BackendKind::RandomForest)?;
        Ok(Self { task, feature_names, state: Some(state), cancel: CancelToken::new() })
    }

    fn trained_state(&self) -> ModelResult<&ForestState> {
        self.state.as_ref().ok_or(ModelError::NotTrained)
    }
}

fn normalized(mut scores: Vec<f64>) -> Vec<f64> {
    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        for s in &mut scores {
            *s /= total;
        }
    }
    scores
}

impl ModelBackend for RandomForestModel {
    fn kind(&self) -> BackendKind {
        BackendKind::RandomForest
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    fn n_classes(&self) -> Option<usize> {
        self.state.as_ref().and_then(|s| s.n_classes)
    }

    fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    fn fit(&mut self, train: &Samples, _validation: Option<&Samples>, params: &Hyperparameters) -> ModelResult<FitReport> {
        if train.is_empty() {
            return Err(ModelError::InvalidInput("cannot fit on an empty training set".to_string()));
        }
        let n_classes = resolve_class_count(self.task, &train.labels, params)?;
        let n_estimators = params.get_usize("n_estimators", 100)?;
        if n_estimators == 0 {
            return Err(ModelError::Configuration("n_estimators must be >= 1".to_string()));
        }
        let seed = if params.contains("seed") { params.get_u64("seed", 42)? } else { params.get_u64("random_state", 42)? };
        let bootstrap = params.get_bool("bootstrap", true)?;
        let n_features = train.features.n_cols();
        let grow_params = GrowParams {
            max_depth: params.get_opt_usize("max_depth")?,
            min_samples_split: params.get_usize("min_samples_split", 2)?,
            max_features: Some(MaxFeatures::parse(params, self.task)?.resolve(n_features)),
        };
        let n = train.len();

        debug!(task = %self.task, rows = n, trees = n_estimators, ?grow_params, "Fitting random forest");

        let classes: Vec<usize> = train.labels.iter().map(|l| *l as usize).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut trees = Vec::with_capacity(n_estimators);
        let mut importances = vec![0.0; n_features];

        for _ in 0..n_estimators {
            self.cancel.check()?;
            let rows: Vec<usize> = if bootstrap { (0..n).map(|_| rng.gen_range(0..n)).collect() } else { (0..n).collect() };
            let tree = match n_classes {
                Some(n_classes) => {
                    grow(&GiniCriterion { classes: &classes, n_classes }, &train.features, rows, &grow_params, Some(&mut rng))
                }
                None => grow(&VarianceCriterion { targets: &train.labels }, &train.features, rows, &grow_params, Some(&mut rng)),
            };
            for (total, share) in importances.iter_mut().zip(normalized(tree.gain_by_feature(n_features))) {
                *total += share;
            }
            trees.push(tree);
        }

        self.feature_names = train.features.feature_names().to_vec();
        self.state = Some(ForestState { n_classes, trees, importances: normalized(importances) });
        Ok(FitReport { n_classes, best_iteration: None, history: None })
    }

    fn predict(&self, features: &FeatureMatrix) -> ModelResult<Vec<f64>> {
        let state = self.trained_state()?;
        features.check_schema(&self.feature_names)?;
        let n_trees = state.trees.len() as f64;
        let width = state.n_classes.unwrap_or(1);

        let out = features
            .rows()
            .map(|row| {
                let mut acc = vec![0.0; width];
                for tree in &state.trees {
                    for (a, v) in acc.iter_mut().zip(tree.leaf_value(row)) {
                        *a += v;
                    }
                }
                match self.task {
                    TaskKind::Regression => acc[0] / n_trees,
                    TaskKind::Binary => threshold(acc[1] / n_trees),
                    TaskKind::Multiclass => argmax(&acc) as f64,
                }
            })
            .collect();
        Ok(out)
    }

    fn to_blob(&self) -> ModelResult<Vec<u8>> {
        let state = self.trained_state()?;
        blob::encode(BackendKind::RandomForest, self.task, &self.feature_names, state)
    }

    fn feature_importance(&self) -> ModelResult<Vec<FeatureScore>> {
        let state = self.trained_state()?;
        Ok(ranked(&self.feature_names, state.importances.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Samples {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            let jitter = f64::from(i % 5) * 0.1;
            rows.push(vec![jitter, 1.0 + jitter]);
            labels.push(0.0);
            rows.push(vec![5.0 + jitter, 1.0 - jitter]);
            labels.push(1.0);
        }
        let names = vec!["signal".to_string(), "noise".to_string()];
        Samples::new(FeatureMatrix::new(names, rows).unwrap(), labels).unwrap()
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Count(50).resolve(3), 3);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(10), 5);
        let params = Hyperparameters::new().with("max_features", ParamValue::Text("bogus".to_string()));
        assert!(MaxFeatures::parse(&params, TaskKind::Binary).is_err());
        assert_eq!(MaxFeatures::parse(&Hyperparameters::new(), TaskKind::Regression).unwrap(), MaxFeatures::All);
    }

    #[test]
    fn test_binary_forest_separates_blobs() {
        let train = two_blobs();
        let mut model = RandomForestModel::new(TaskKind::Binary);
        let params = Hyperparameters::new().with("n_estimators", ParamValue::Int(15));
        let report = model.fit(&train, None, &params).unwrap();
        assert_eq!(report.n_classes, Some(2));
        assert!(report.history.is_none());
        assert_eq!(model.predict(&train.features).unwrap(), train.labels);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let train = two_blobs();
        let params = Hyperparameters::new().with("n_estimators", ParamValue::Int(5)).with("seed", ParamValue::Int(7));
        let mut a = RandomForestModel::new(TaskKind::Binary);
        let mut b = RandomForestModel::new(TaskKind::Binary);
        a.fit(&train, None, &params).unwrap();
        b.fit(&train, None, &params).unwrap();
        assert_eq!(a.to_blob().unwrap(), b.to_blob().unwrap());
    }

    #[test]
    fn test_importance_sums_to_one() {
        let train = two_blobs();
        let mut model = RandomForestModel::new(TaskKind::Binary);
        model.fit(&train, None, &Hyperparameters::new().with("n_estimators", ParamValue::Int(10))).unwrap();
        let importance = model.feature_importance().unwrap();
        let total: f64 = importance.iter().map(|f| f.score).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(importance[0].name, "signal");
    }

    #[test]
    fn test_regression_forest_averages_leaves() {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![f64::from(i)]).collect();
        let labels: Vec<f64> = (0..30).map(|i| if i < 15 { 1.0 } else { 3.0 }).collect();
        let train = Samples::new(FeatureMatrix::new(vec!["x".to_string()], rows).unwrap(), labels).unwrap();
        let mut model = RandomForestModel::new(TaskKind::Regression);
        model.fit(&train, None, &Hyperparameters::new().with("n_estimators", ParamValue::Int(20))).unwrap();
        let query = FeatureMatrix::new(vec!["x".to_string()], vec![vec![0.0], vec![29.0]]).unwrap();
        let out = model.predict(&query).unwrap();
        assert!(out[0] < 2.0);
        assert!(out[1] > 2.0);
    }
}
