//! Linear backend.
//!
//! Regression uses (optionally ridge-penalized) least squares solved through the
//! normal equations. Binary and multiclass classification use L2-regularized
//! logistic / softmax regression fitted by batch gradient descent on standardized
//! features.

use crate::blob;
use crate::boosted::ranked;
use crate::labels::{argmax, resolve_class_count, sigmoid, softmax, threshold};
use gridlab_abstraction::{
    BackendKind, CancelToken, FeatureMatrix, FeatureScore, FitReport, Hyperparameters, LossHistory, ModelBackend, ModelError,
    ModelResult, Samples, TaskKind,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "solver", rename_all = "snake_case")]
enum LinearState {
    LeastSquares {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    Logistic {
        n_classes: usize,
        mean: Vec<f64>,
        scale: Vec<f64>,
        /// One weight vector per output (a single one for binary).
        weights: Vec<Vec<f64>>,
        intercepts: Vec<f64>,
    },
}

/// Linear / logistic regression backend.
#[derive(Debug, Clone)]
pub struct LinearModel {
    task: TaskKind,
    feature_names: Vec<String>,
    state: Option<LinearState>,
    cancel: CancelToken,
}

impl LinearModel {
    #[must_use]
    pub fn new(task: TaskKind) -> Self {
        Self { task, feature_names: Vec::new(), state: None, cancel: CancelToken::new() }
    }

    pub fn from_blob(bytes: &[u8]) -> ModelResult<Self> {
        let (task, feature_names, state) = blob::decode(bytes, BackendKind::Linear)?;
        Ok(Self { task, feature_names, state: Some(state), cancel: CancelToken::new() })
    }

    fn trained_state(&self) -> ModelResult<&LinearState> {
        self.state.as_ref().ok_or(ModelError::NotTrained)
    }
}

/// Solve `a x = b` in place by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

fn column_means(features: &FeatureMatrix) -> Vec<f64> {
    let mut mean = vec![0.0; features.n_cols()];
    for row in features.rows() {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    let n = features.n_rows() as f64;
    mean.iter_mut().for_each(|m| *m /= n);
    mean
}

fn fit_least_squares(train: &Samples, alpha: f64) -> ModelResult<LinearState> {
    let features = &train.features;
    let p = features.n_cols();
    let mean = column_means(features);
    let y_mean = train.labels.iter().sum::<f64>() / train.len() as f64;

    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];
    for (row, y) in features.rows().zip(&train.labels) {
        let centered: Vec<f64> = row.iter().zip(&mean).map(|(v, m)| v - m).collect();
        for i in 0..p {
            xty[i] += centered[i] * (y - y_mean);
            for j in 0..p {
                xtx[i][j] += centered[i] * centered[j];
            }
        }
    }

    let with_ridge = |ridge: f64| {
        let mut a = xtx.clone();
        for (i, row) in a.iter_mut().enumerate() {
            row[i] += ridge;
        }
        solve(a, xty.clone())
    };
    let coefficients = match with_ridge(alpha) {
        Some(c) => c,
        None => {
            // Collinear or constant columns; a tiny ridge picks the minimum-norm-ish solution.
            warn!("Normal equations are singular, retrying with a small ridge penalty");
            with_ridge(alpha + 1e-8)
                .ok_or_else(|| ModelError::InvalidInput("least squares system is singular".to_string()))?
        }
    };
    let intercept = y_mean - coefficients.iter().zip(&mean).map(|(c, m)| c * m).sum::<f64>();
    Ok(LinearState::LeastSquares { coefficients, intercept })
}

struct GradientConfig {
    max_iter: usize,
    learning_rate: f64,
    c: f64,
    tol: f64,
}

fn standardize(features: &FeatureMatrix) -> (Vec<f64>, Vec<f64>) {
    let mean = column_means(features);
    let mut var = vec![0.0; features.n_cols()];
    for row in features.rows() {
        for ((s, v), m) in var.iter_mut().zip(row).zip(&mean) {
            *s += (v - m).powi(2);
        }
    }
    let n = features.n_rows() as f64;
    let scale = var.into_iter().map(|s| if s > 0.0 { (s / n).sqrt() } else { 1.0 }).collect();
    (mean, scale)
}

fn logistic_outputs(weights: &[Vec<f64>], intercepts: &[f64], x: &[f64], out: &mut [f64]) {
    for (o, (w, b)) in out.iter_mut().zip(weights.iter().zip(intercepts)) {
        *o = b + w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>();
    }
}

fn fit_logistic(
    train: &Samples,
    n_classes: usize,
    cfg: &GradientConfig,
    history: &mut LossHistory,
    cancel: &CancelToken,
) -> ModelResult<LinearState> {
    let (mean, scale) = standardize(&train.features);
    let p = train.features.n_cols();
    let n = train.len() as f64;
    let outputs = if n_classes == 2 { 1 } else { n_classes };
    let xs: Vec<Vec<f64>> = train
        .features
        .rows()
        .map(|row| row.iter().zip(mean.iter().zip(&scale)).map(|(v, (m, s))| (v - m) / s).collect())
        .collect();

    let mut weights = vec![vec![0.0; p]; outputs];
    let mut intercepts = vec![0.0; outputs];
    let mut z = vec![0.0; outputs];
    let mut previous = f64::INFINITY;

    for _ in 0..cfg.max_iter {
        cancel.check()?;
        let mut grad_w = vec![vec![0.0; p]; outputs];
        let mut grad_b = vec![0.0; outputs];
        let mut loss = 0.0;

        for (x, y) in xs.iter().zip(&train.labels) {
            logistic_outputs(&weights, &intercepts, x, &mut z);
            if outputs == 1 {
                let prob = sigmoid(z[0]);
                loss -= y * prob.max(1e-15).ln() + (1.0 - y) * (1.0 - prob).max(1e-15).ln();
                z[0] = prob - y;
            } else {
                softmax(&mut z);
                let class = *y as usize;
                loss -= z[class].max(1e-15).ln();
                z[class] -= 1.0;
            }
            for k in 0..outputs {
                grad_b[k] += z[k];
                for j in 0..p {
                    grad_w[k][j] += z[k] * x[j];
                }
            }
        }

        let penalty: f64 = weights.iter().flatten().map(|w| w * w).sum::<f64>() / (2.0 * cfg.c);
        let objective = loss / n + penalty / n;
        history.train.push(objective);

        for k in 0..outputs {
            intercepts[k] -= cfg.learning_rate * grad_b[k] / n;
            for j in 0..p {
                let g = grad_w[k][j] / n + weights[k][j] / (cfg.c * n);
                weights[k][j] -= cfg.learning_rate * g;
            }
        }

        if (previous - objective).abs() < cfg.tol {
            break;
        }
        previous = objective;
    }

    Ok(LinearState::Logistic { n_classes, mean, scale, weights, intercepts })
}

impl ModelBackend for LinearModel {
    fn kind(&self) -> BackendKind {
        BackendKind::Linear
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    fn n_classes(&self) -> Option<usize> {
        match &self.state {
            Some(LinearState::Logistic { n_classes, .. }) => Some(*n_classes),
            _ => None,
        }
    }

    fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    fn fit(&mut self, train: &Samples, _validation: Option<&Samples>, params: &Hyperparameters) -> ModelResult<FitReport> {
        if train.is_empty() {
            return Err(ModelError::InvalidInput("cannot fit on an empty training set".to_string()));
        }
        let n_classes = resolve_class_count(self.task, &train.labels, params)?;
        debug!(task = %self.task, rows = train.len(), "Fitting linear model");

        let (state, history) = match n_classes {
            None => {
                let alpha = params.get_f64("alpha", 0.0)?;
                if alpha < 0.0 {
                    return Err(ModelError::Configuration("alpha must be >= 0".to_string()));
                }
                (fit_least_squares(train, alpha)?, None)
            }
            Some(n_classes) => {
                let cfg = GradientConfig {
                    max_iter: params.get_usize("max_iter", 1000)?,
                    learning_rate: params.get_f64("learning_rate", 0.5)?,
                    c: params.get_f64("C", 1.0)?,
                    tol: params.get_f64("tol", 1e-6)?,
                };
                if cfg.max_iter == 0 || cfg.learning_rate <= 0.0 || cfg.c <= 0.0 {
                    return Err(ModelError::Configuration(
                        "max_iter, learning_rate and C must be positive".to_string(),
                    ));
                }
                let metric = if n_classes == 2 { "logloss" } else { "mlogloss" };
                let mut history = LossHistory { metric: metric.to_string(), ..LossHistory::default() };
                (fit_logistic(train, n_classes, &cfg, &mut history, &self.cancel)?, Some(history))
            }
        };

        self.feature_names = train.features.feature_names().to_vec();
        self.state = Some(state);
        Ok(FitReport { n_classes, best_iteration: None, history })
    }

    fn predict(&self, features: &FeatureMatrix) -> ModelResult<Vec<f64>> {
        let state = self.trained_state()?;
        features.check_schema(&self.feature_names)?;
        let out = match state {
            LinearState::LeastSquares { coefficients, intercept } => features
                .rows()
                .map(|row| intercept + row.iter().zip(coefficients).map(|(v, c)| v * c).sum::<f64>())
                .collect(),
            LinearState::Logistic { mean, scale, weights, intercepts, .. } => {
                let mut z = vec![0.0; weights.len()];
                features
                    .rows()
                    .map(|row| {
                        let x: Vec<f64> = row.iter().zip(mean.iter().zip(scale)).map(|(v, (m, s))| (v - m) / s).collect();
                        logistic_outputs(weights, intercepts, &x, &mut z);
                        if z.len() == 1 { threshold(sigmoid(z[0])) } else { argmax(&z) as f64 }
                    })
                    .collect()
            }
        };
        Ok(out)
    }

    fn to_blob(&self) -> ModelResult<Vec<u8>> {
        let state = self.trained_state()?;
        blob::encode(BackendKind::Linear, self.task, &self.feature_names, state)
    }

    /// Absolute coefficient magnitude; for softmax models the mean across classes.
    fn feature_importance(&self) -> ModelResult<Vec<FeatureScore>> {
        let scores = match self.trained_state()? {
            LinearState::LeastSquares { coefficients, .. } => coefficients.iter().map(|c| c.abs()).collect(),
            LinearState::Logistic { weights, .. } => {
                let outputs = weights.len() as f64;
                (0..self.feature_names.len())
                    .map(|j| weights.iter().map(|w| w[j].abs()).sum::<f64>() / outputs)
                    .collect()
            }
        };
        Ok(ranked(&self.feature_names, scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlab_abstraction::ParamValue;

    #[test]
    fn test_least_squares_recovers_plane() {
        // y = 3a - 2b + 1
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![f64::from(i), f64::from((i * 7) % 5)]).collect();
        let labels: Vec<f64> = rows.iter().map(|r| 3.0 * r[0] - 2.0 * r[1] + 1.0).collect();
        let names = vec!["a".to_string(), "b".to_string()];
        let train = Samples::new(FeatureMatrix::new(names, rows).unwrap(), labels.clone()).unwrap();

        let mut model = LinearModel::new(TaskKind::Regression);
        model.fit(&train, None, &Hyperparameters::new()).unwrap();
        for (p, y) in model.predict(&train.features).unwrap().iter().zip(&labels) {
            assert!((p - y).abs() < 1e-8);
        }
        let importance = model.feature_importance().unwrap();
        assert_eq!(importance[0].name, "a");
        assert!((importance[0].score - 3.0).abs() < 1e-8);
    }

    #[test]
    fn test_duplicate_column_falls_back_to_ridge() {
        let rows: Vec<Vec<f64>> = (0..8).map(|i| vec![f64::from(i), f64::from(i)]).collect();
        let labels: Vec<f64> = (0..8).map(|i| f64::from(i) * 2.0).collect();
        let names = vec!["a".to_string(), "a_copy".to_string()];
        let train = Samples::new(FeatureMatrix::new(names, rows).unwrap(), labels).unwrap();
        let mut model = LinearModel::new(TaskKind::Regression);
        model.fit(&train, None, &Hyperparameters::new()).unwrap();
        let query = FeatureMatrix::new(vec!["a".to_string(), "a_copy".to_string()], vec![vec![3.0, 3.0]]).unwrap();
        assert!((model.predict(&query).unwrap()[0] - 6.0).abs() < 1e-3);
    }

    #[test]
    fn test_logistic_separates_binary() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![f64::from(i)]).collect();
        let labels: Vec<f64> = (0..20).map(|i| if i >= 10 { 1.0 } else { 0.0 }).collect();
        let train = Samples::new(FeatureMatrix::new(vec!["x".to_string()], rows).unwrap(), labels.clone()).unwrap();
        let mut model = LinearModel::new(TaskKind::Binary);
        let report = model.fit(&train, None, &Hyperparameters::new().with("C", ParamValue::Float(100.0))).unwrap();
        assert_eq!(report.history.unwrap().metric, "logloss");
        assert_eq!(model.predict(&train.features).unwrap(), labels);
    }

    #[test]
    fn test_softmax_multiclass() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for class in 0..3 {
            for j in 0..8 {
                rows.push(vec![f64::from(class) * 10.0 + f64::from(j) * 0.1]);
                labels.push(f64::from(class));
            }
        }
        let train = Samples::new(FeatureMatrix::new(vec!["x".to_string()], rows).unwrap(), labels.clone()).unwrap();
        let mut model = LinearModel::new(TaskKind::Multiclass);
        let params = Hyperparameters::new().with("C", ParamValue::Float(100.0)).with("max_iter", ParamValue::Int(3000))
            .with("tol", ParamValue::Float(0.0));
        assert_eq!(model.fit(&train, None, &params).unwrap().n_classes, Some(3));
        assert_eq!(model.predict(&train.features).unwrap(), labels);
    }

    #[test]
    fn test_solve_singular_is_none() {
        assert!(solve(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]).is_none());
        let x = solve(vec![vec![2.0, 0.0], vec![0.0, 4.0]], vec![2.0, 8.0]).unwrap();
        assert_eq!(x, vec![1.0, 2.0]);
    }
}
