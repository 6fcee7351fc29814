//! Evaluation metrics computed from labels and predictions.

use crate::error::{TrainingError, TrainingResult};
use gridlab_abstraction::TaskKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Precision/recall/f1 for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub class: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Metric name to value, e.g. `accuracy` or `rmse`.
    pub values: BTreeMap<String, f64>,
    /// `confusion_matrix[actual][predicted]`, classification only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confusion_matrix: Option<Vec<Vec<u64>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_class: Vec<ClassScore>,
}

impl Metrics {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

pub fn evaluate(task: TaskKind, labels: &[f64], predicted: &[f64], n_classes: Option<usize>) -> TrainingResult<Metrics> {
    if labels.len() != predicted.len() {
        return Err(TrainingError::Validation(format!(
            "{} labels but {} predictions",
            labels.len(),
            predicted.len()
        )));
    }
    if labels.is_empty() {
        return Err(TrainingError::Validation("cannot evaluate on an empty sample".to_string()));
    }
    if task.is_classification() { classification(task, labels, predicted, n_classes) } else { Ok(regression(labels, predicted)) }
}

/// Map a label or prediction onto `0..n_classes`.
fn class_index(value: f64, n_classes: usize) -> TrainingResult<usize> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value >= n_classes as f64 {
        return Err(TrainingError::Validation(format!(
            "{value} is not a class index of a {n_classes}-class model"
        )));
    }
    Ok(value as usize)
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// The matrix is sized by the model's class count, never by the label values.
fn classification(task: TaskKind, labels: &[f64], predicted: &[f64], n_classes: Option<usize>) -> TrainingResult<Metrics> {
    let k = match (task, n_classes) {
        (_, Some(k)) if k >= 2 => k,
        (TaskKind::Binary, None) => 2,
        _ => {
            return Err(TrainingError::Validation(format!("{task} evaluation needs the model's class count")));
        }
    };
    let actual: Vec<usize> = labels.iter().map(|v| class_index(*v, k)).collect::<TrainingResult<_>>()?;
    let guessed: Vec<usize> = predicted.iter().map(|v| class_index(*v, k)).collect::<TrainingResult<_>>()?;

    let mut matrix = vec![vec![0_u64; k]; k];
    for (a, p) in actual.iter().zip(&guessed) {
        matrix[*a][*p] += 1;
    }

    let correct: u64 = (0..k).map(|c| matrix[c][c]).sum();
    let total = labels.len() as u64;
    let mut per_class = Vec::new();
    for c in 0..k {
        let tp = matrix[c][c];
        let support: u64 = matrix[c].iter().sum();
        let predicted_as: u64 = matrix.iter().map(|row| row[c]).sum();
        if support == 0 && predicted_as == 0 {
            continue;
        }
        let precision = ratio(tp, predicted_as);
        let recall = ratio(tp, support);
        let f1 = if precision + recall > 0.0 { 2.0 * precision * recall / (precision + recall) } else { 0.0 };
        per_class.push(ClassScore { class: c, precision, recall, f1, support });
    }

    let macro_avg = |f: fn(&ClassScore) -> f64| per_class.iter().map(f).sum::<f64>() / per_class.len() as f64;
    let mut values = BTreeMap::new();
    values.insert("accuracy".to_string(), ratio(correct, total));
    values.insert("precision_macro".to_string(), macro_avg(|s| s.precision));
    values.insert("recall_macro".to_string(), macro_avg(|s| s.recall));
    values.insert("f1_macro".to_string(), macro_avg(|s| s.f1));

    Ok(Metrics { values, confusion_matrix: Some(matrix), per_class })
}

fn regression(labels: &[f64], predicted: &[f64]) -> Metrics {
    let n = labels.len() as f64;
    let mean = labels.iter().sum::<f64>() / n;
    let ss_res: f64 = labels.iter().zip(predicted).map(|(y, p)| (y - p).powi(2)).sum();
    let ss_tot: f64 = labels.iter().map(|y| (y - mean).powi(2)).sum();
    let mae = labels.iter().zip(predicted).map(|(y, p)| (y - p).abs()).sum::<f64>() / n;
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    let mut values = BTreeMap::new();
    values.insert("rmse".to_string(), (ss_res / n).sqrt());
    values.insert("mae".to_string(), mae);
    values.insert("r2".to_string(), r2);
    Metrics { values, confusion_matrix: None, per_class: Vec::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_metrics() {
        let metrics = evaluate(TaskKind::Regression, &[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0], None).unwrap();
        assert!((metrics.get("rmse").unwrap() - (4.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((metrics.get("mae").unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.get("r2").unwrap() - (1.0 - 4.0 / 2.0)).abs() < 1e-12);
        assert!(metrics.confusion_matrix.is_none());
    }

    #[test]
    fn test_confusion_matrix_is_square_and_counts() {
        let labels = [0.0, 0.0, 1.0, 2.0, 2.0];
        let predicted = [0.0, 1.0, 1.0, 2.0, 0.0];
        let metrics = evaluate(TaskKind::Multiclass, &labels, &predicted, Some(3)).unwrap();
        let cm = metrics.confusion_matrix.unwrap();
        assert_eq!(cm, vec![vec![1, 1, 0], vec![0, 1, 0], vec![1, 0, 1]]);
        assert!((metrics.values["accuracy"] - 0.6).abs() < 1e-12);
        assert_eq!(metrics.per_class.len(), 3);
        assert_eq!(metrics.per_class[0].support, 2);
        assert!((metrics.per_class[1].precision - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_class_count_hint_pads_matrix() {
        let metrics = evaluate(TaskKind::Multiclass, &[0.0, 1.0], &[0.0, 1.0], Some(4)).unwrap();
        assert_eq!(metrics.confusion_matrix.unwrap().len(), 4);
        assert_eq!(metrics.per_class.len(), 2);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        assert!(evaluate(TaskKind::Binary, &[0.0], &[], None).is_err());
        assert!(evaluate(TaskKind::Binary, &[], &[], None).is_err());
        assert!(evaluate(TaskKind::Binary, &[0.5], &[0.0], None).is_err());
    }

    #[test]
    fn test_labels_outside_model_classes_rejected() {
        let huge = evaluate(TaskKind::Binary, &[0.0, 1e12], &[0.0, 1.0], Some(2));
        assert!(matches!(huge, Err(TrainingError::Validation(_))));
        let multi = evaluate(TaskKind::Multiclass, &[0.0, 3.0], &[0.0, 1.0], Some(3));
        assert!(matches!(multi, Err(TrainingError::Validation(_))));
        assert!(evaluate(TaskKind::Multiclass, &[0.0, f64::NAN], &[0.0, 1.0], Some(3)).is_err());
        assert!(evaluate(TaskKind::Multiclass, &[0.0, 1.0], &[0.0, 1.0], None).is_err());
    }
}
