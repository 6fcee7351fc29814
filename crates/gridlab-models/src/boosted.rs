//! Gradient-boosted trees.
//!
//! Second-order boosting in the XGBoost style: each round fits one tree per output
//! group to the gradient/hessian of the objective, leaf weights are
//! `-eta * G / (H + lambda)`. Objectives are squared error (regression), logistic
//! (binary) and softmax (multiclass, one group per class).

use crate::blob;
use crate::labels::{argmax, check_labels, resolve_class_count, sigmoid, softmax, threshold};
use crate::tree::{grow, GradientCriterion, GrowParams, Tree};
use gridlab_abstraction::{
    BackendKind, CancelToken, FeatureMatrix, FeatureScore, FitReport, Hyperparameters, LossHistory, ModelBackend, ModelError,
    ModelResult, Samples, TaskKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MIN_HESSIAN: f64 = 1e-16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BoostedState {
    n_classes: Option<usize>,
    base_margin: f64,
    /// One entry per boosting round, each holding one tree per output group.
    rounds: Vec<Vec<Tree>>,
}

impl BoostedState {
    fn groups(&self) -> usize {
        self.rounds.first().map_or(1, Vec::len)
    }
}

#[derive(Debug, Clone)]
struct BoostParams {
    max_depth: Option<usize>,
    eta: f64,
    num_rounds: usize,
    lambda: f64,
    gamma: f64,
    min_child_weight: f64,
    early_stopping_rounds: usize,
}

impl BoostParams {
    fn from_hyperparameters(params: &Hyperparameters) -> ModelResult<Self> {
        let max_depth = match params.get_usize("max_depth", 6)? {
            0 => None,
            depth => Some(depth),
        };
        let eta = if params.contains("learning_rate") {
            params.get_f64("learning_rate", 0.3)?
        } else {
            params.get_f64("eta", 0.3)?
        };
        let num_rounds = if params.contains("n_estimators") {
            params.get_usize("n_estimators", 100)?
        } else {
            params.get_usize("num_boost_round", 100)?
        };
        let lambda = if params.contains("reg_lambda") {
            params.get_f64("reg_lambda", 1.0)?
        } else {
            params.get_f64("lambda", 1.0)?
        };
        let parsed = Self {
            max_depth,
            eta,
            num_rounds,
            lambda,
            gamma: params.get_f64("gamma", 0.0)?,
            min_child_weight: params.get_f64("min_child_weight", 1.0)?,
            early_stopping_rounds: params.get_usize("early_stopping_rounds", 10)?,
        };
        if parsed.eta <= 0.0 {
            return Err(ModelError::Configuration("eta must be > 0".to_string()));
        }
        if parsed.num_rounds == 0 {
            return Err(ModelError::Configuration("num_boost_round must be >= 1".to_string()));
        }
        if parsed.lambda < 0.0 || parsed.gamma < 0.0 || parsed.min_child_weight < 0.0 {
            return Err(ModelError::Configuration("lambda, gamma and min_child_weight must be >= 0".to_string()));
        }
        Ok(parsed)
    }
}

/// Gradient-boosted tree backend.
#[derive(Debug, Clone)]
pub struct BoostedTreeModel {
    task: TaskKind,
    feature_names: Vec<String>,
    state: Option<BoostedState>,
    cancel: CancelToken,
}

impl BoostedTreeModel {
    #[must_use]
    pub fn new(task: TaskKind) -> Self {
        Self { task, feature_names: Vec::new(), state: None, cancel: CancelToken::new() }
    }

    pub fn from_blob(bytes: &[u8]) -> ModelResult<Self> {
        let (task, feature_names, state) = blob::decode(bytes, BackendKind::BoostedTree)?;
        Ok(Self { task, feature_names, state: Some(state), cancel: CancelToken::new() })
    }

    fn trained_state(&self) -> ModelResult<&BoostedState> {
        self.state.as_ref().ok_or(ModelError::NotTrained)
    }
}

fn initial_margin(task: TaskKind, labels: &[f64]) -> f64 {
    match task {
        TaskKind::Regression => labels.iter().sum::<f64>() / labels.len() as f64,
        TaskKind::Binary | TaskKind::Multiclass => 0.0,
    }
}

/// Fill `grad`/`hess` (group-major, `groups * n` long) from the current margins (row-major).
fn gradients(task: TaskKind, margins: &[f64], labels: &[f64], groups: usize, grad: &mut [f64], hess: &mut [f64]) {
    let n = labels.len();
    match task {
        TaskKind::Regression => {
            for i in 0..n {
                grad[i] = margins[i] - labels[i];
                hess[i] = 1.0;
            }
        }
        TaskKind::Binary => {
            for i in 0..n {
                let p = sigmoid(margins[i]);
                grad[i] = p - labels[i];
                hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
            }
        }
        TaskKind::Multiclass => {
            let mut probs = vec![0.0; groups];
            for i in 0..n {
                probs.copy_from_slice(&margins[i * groups..(i + 1) * groups]);
                softmax(&mut probs);
                for k in 0..groups {
                    let target = if labels[i] as usize == k { 1.0 } else { 0.0 };
                    grad[k * n + i] = probs[k] - target;
                    hess[k * n + i] = (2.0 * probs[k] * (1.0 - probs[k])).max(MIN_HESSIAN);
                }
            }
        }
    }
}

fn loss(task: TaskKind, margins: &[f64], labels: &[f64], groups: usize) -> f64 {
    const EPS: f64 = 1e-15;
    let n = labels.len().max(1) as f64;
    match task {
        TaskKind::Regression => {
            let sse: f64 = margins.iter().zip(labels).map(|(m, y)| (m - y).powi(2)).sum();
            (sse / n).sqrt()
        }
        TaskKind::Binary => {
            let total: f64 = margins
                .iter()
                .zip(labels)
                .map(|(m, y)| {
                    let p = sigmoid(*m).clamp(EPS, 1.0 - EPS);
                    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
                })
                .sum();
            total / n
        }
        TaskKind::Multiclass => {
            let mut probs = vec![0.0; groups];
            let mut total = 0.0;
            for (i, y) in labels.iter().enumerate() {
                probs.copy_from_slice(&margins[i * groups..(i + 1) * groups]);
                softmax(&mut probs);
                total -= probs[*y as usize].clamp(EPS, 1.0).ln();
            }
            total / n
        }
    }
}

fn metric_name(task: TaskKind) -> &'static str {
    match task {
        TaskKind::Regression => "rmse",
        TaskKind::Binary => "logloss",
        TaskKind::Multiclass => "mlogloss",
    }
}

fn add_round(trees: &[Tree], features: &FeatureMatrix, margins: &mut [f64]) {
    let groups = trees.len();
    for (i, row) in features.rows().enumerate() {
        for (k, tree) in trees.iter().enumerate() {
            margins[i * groups + k] += tree.leaf_value(row)[0];
        }
    }
}

impl ModelBackend for BoostedTreeModel {
    fn kind(&self) -> BackendKind {
        BackendKind::BoostedTree
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

    fn fit(
        &mut self,
        train: &Samples,
        validation: Option<&Samples>,
        params: &Hyperparameters,
    ) -> ModelResult<FitReport> {
        if train.is_empty() {
            return Err(ModelError::InvalidInput("cannot fit on an empty training set".to_string()));
        }
        let n_classes = resolve_class_count(self.task, &train.labels, params)?;
        if let Some(val) = validation {
            val.features.check_schema(train.features.feature_names())?;
            check_labels(self.task, &val.labels, n_classes)?;
        }
        let cfg = BoostParams::from_hyperparameters(params)?;
        let groups = if self.task == TaskKind::Multiclass { n_classes.unwrap_or(1) } else { 1 };
        let n = train.len();
        let base_margin = initial_margin(self.task, &train.labels);

        debug!(task = %self.task, rows = n, groups, rounds = cfg.num_rounds, "Fitting boosted trees");

        let grow_params = GrowParams { max_depth: cfg.max_depth, min_samples_split: 2, max_features: None };
        let mut train_margins = vec![base_margin; n * groups];
        let mut eval_margins = validation.map(|v| vec![base_margin; v.len() * groups]);
        let mut grad = vec![0.0; n * groups];
        let mut hess = vec![0.0; n * groups];
        let mut history = LossHistory { metric: metric_name(self.task).to_string(), ..LossHistory::default() };
        let mut rounds: Vec<Vec<Tree>> = Vec::with_capacity(cfg.num_rounds);
        let mut best: Option<(usize, f64)> = None;

        for round in 0..cfg.num_rounds {
            self.cancel.check()?;
            gradients(self.task, &train_margins, &train.labels, groups, &mut grad, &mut hess);
            let trees: Vec<Tree> = (0..groups)
                .map(|k| {
                    let criterion = GradientCriterion {
                        grad: &grad[k * n..(k + 1) * n],
                        hess: &hess[k * n..(k + 1) * n],
                        lambda: cfg.lambda,
                        gamma: cfg.gamma,
                        min_child_weight: cfg.min_child_weight,
                        eta: cfg.eta,
                    };
                    grow(&criterion, &train.features, (0..n).collect(), &grow_params, None)
                })
                .collect();

            add_round(&trees, &train.features, &mut train_margins);
            history.train.push(loss(self.task, &train_margins, &train.labels, groups));
            rounds.push(trees);

            if let (Some(val), Some(margins)) = (validation, eval_margins.as_mut()) {
                add_round(&rounds[round], &val.features, margins);
                let eval_loss = loss(self.task, margins, &val.labels, groups);
                history.eval.push(eval_loss);
                if best.is_none_or(|(_, best_loss)| eval_loss < best_loss) {
                    best = Some((round, eval_loss));
                } else if let Some((best_round, _)) = best {
                    if cfg.early_stopping_rounds > 0 && round - best_round >= cfg.early_stopping_rounds {
                        debug!(round, best_round, "Early stopping");
                        break;
                    }
                }
            }
        }

        if let Some((best_round, _)) = best {
            rounds.truncate(best_round + 1);
        }
        let best_iteration = rounds.len() - 1;

        self.feature_names = train.features.feature_names().to_vec();
        self.state = Some(BoostedState { n_classes, base_margin, rounds });

        Ok(FitReport { n_classes, best_iteration: Some(best_iteration), history: Some(history) })
    }

    fn predict(&self, features: &FeatureMatrix) -> ModelResult<Vec<f64>> {
        let state = self.trained_state()?;
        features.check_schema(&self.feature_names)?;
        let groups = state.groups();
        let mut margins = vec![state.base_margin; features.n_rows() * groups];
        for trees in &state.rounds {
            add_round(trees, features, &mut margins);
        }

        let out = match self.task {
            TaskKind::Regression => margins,
            TaskKind::Binary => margins.into_iter().map(|m| threshold(sigmoid(m))).collect(),
            TaskKind::Multiclass => margins.chunks_exact(groups).map(|row| argmax(row) as f64).collect(),
        };
        Ok(out)
    }

    fn to_blob(&self) -> ModelResult<Vec<u8>> {
        let state = self.trained_state()?;
        blob::encode(BackendKind::BoostedTree, self.task, &self.feature_names, state)
    }

    fn feature_importance(&self) -> ModelResult<Vec<FeatureScore>> {
        let state = self.trained_state()?;
        let mut totals = vec![0.0; self.feature_names.len()];
        for tree in state.rounds.iter().flatten() {
            for (total, gain) in totals.iter_mut().zip(tree.gain_by_feature(self.feature_names.len())) {
                *total += gain;
            }
        }
        Ok(ranked(&self.feature_names, totals))
    }
}

/// Pair names with scores, most important first.
pub(crate) fn ranked(names: &[String], scores: Vec<f64>) -> Vec<FeatureScore> {
    let mut out: Vec<FeatureScore> =
        names.iter().cloned().zip(scores).map(|(name, score)| FeatureScore { name, score }).collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlab_abstraction::ParamValue;

    fn samples(rows: Vec<Vec<f64>>, labels: Vec<f64>) -> Samples {
        let names = (0..rows[0].len()).map(|i| format!("f{i}")).collect();
        Samples::new(FeatureMatrix::new(names, rows).unwrap(), labels).unwrap()
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let model = BoostedTreeModel::new(TaskKind::Regression);
        let features = FeatureMatrix::new(vec!["f0".to_string()], vec![vec![1.0]]).unwrap();
        assert_eq!(model.predict(&features), Err(ModelError::NotTrained));
        assert_eq!(model.to_blob(), Err(ModelError::NotTrained));
    }

    #[test]
    fn test_binary_boosting_learns_threshold() {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![f64::from(i)]).collect();
        let labels: Vec<f64> = (0..40).map(|i| if i >= 20 { 1.0 } else { 0.0 }).collect();
        let train = samples(rows, labels.clone());
        let mut model = BoostedTreeModel::new(TaskKind::Binary);
        let params = Hyperparameters::new().with("num_boost_round", ParamValue::Int(20));
        let report = model.fit(&train, None, &params).unwrap();

        assert_eq!(report.n_classes, Some(2));
        let history = report.history.unwrap();
        assert_eq!(history.metric, "logloss");
        assert_eq!(history.train.len(), 20);
        assert!(history.train.last().unwrap() < history.train.first().unwrap());
        assert_eq!(model.predict(&train.features).unwrap(), labels);
    }

    #[test]
    fn test_multiclass_outputs_class_indices() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let class = i % 3;
            rows.push(vec![f64::from(class) * 10.0 + f64::from(i % 2)]);
            labels.push(f64::from(class));
        }
        let train = samples(rows, labels.clone());
        let mut model = BoostedTreeModel::new(TaskKind::Multiclass);
        let params = Hyperparameters::new().with("num_boost_round", ParamValue::Int(10));
        let report = model.fit(&train, None, &params).unwrap();
        assert_eq!(report.n_classes, Some(3));
        assert_eq!(model.predict(&train.features).unwrap(), labels);
    }

    #[test]
    fn test_multiclass_with_single_class_is_configuration_error() {
        let train = samples(vec![vec![1.0], vec![2.0]], vec![0.0, 0.0]);
        let mut model = BoostedTreeModel::new(TaskKind::Multiclass);
        let err = model.fit(&train, None, &Hyperparameters::new()).unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_early_stopping_keeps_best_round() {
        // Train and validation disagree, so eval loss starts rising quickly.
        let train = samples((0..20).map(|i| vec![f64::from(i)]).collect(), (0..20).map(f64::from).collect());
        let val = samples((0..20).map(|i| vec![f64::from(i)]).collect(), (0..20).map(|i| f64::from(20 - i)).collect());
        let mut model = BoostedTreeModel::new(TaskKind::Regression);
        let params = Hyperparameters::new()
            .with("num_boost_round", ParamValue::Int(200))
            .with("early_stopping_rounds", ParamValue::Int(3));
        let report = model.fit(&train, Some(&val), &params).unwrap();
        let history = report.history.unwrap();
        assert!(history.eval.len() < 200);
        let best = report.best_iteration.unwrap();
        assert_eq!(history.eval.len(), best + 4);
    }

    #[test]
    fn test_importance_ranks_informative_feature_first() {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![f64::from(i % 7), f64::from(i)]).collect();
        let labels: Vec<f64> = (0..30).map(|i| f64::from(i) * 2.0).collect();
        let train = samples(rows, labels);
        let mut model = BoostedTreeModel::new(TaskKind::Regression);
        model.fit(&train, None, &Hyperparameters::new().with("num_boost_round", ParamValue::Int(5))).unwrap();
        let importance = model.feature_importance().unwrap();
        assert_eq!(importance[0].name, "f1");
    }
}
