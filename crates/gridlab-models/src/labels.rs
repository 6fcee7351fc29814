//! Label handling shared by the classification backends.

use gridlab_abstraction::{Hyperparameters, ModelError, ModelResult, ParamValue, TaskKind};
use std::collections::BTreeSet;

/// Hyperparameter carrying the class count for multiclass tasks.
pub const NUM_CLASS_PARAM: &str = "num_class";

/// Derive the class count a task needs from its labels.
///
/// Regression needs none. Binary labels must be 0/1. Multiclass labels must be
/// class indices `0..n`, where `n` is the `num_class` hyperparameter when present
/// and the number of distinct labels otherwise.
pub fn resolve_class_count(task: TaskKind, labels: &[f64], params: &Hyperparameters) -> ModelResult<Option<usize>> {
    match task {
        TaskKind::Regression => Ok(None),
        TaskKind::Binary => {
            if let Some(bad) = labels.iter().find(|l| **l != 0.0 && **l != 1.0) {
                return Err(ModelError::Configuration(format!(
                    "binary classification requires 0/1 labels, found {bad}"
                )));
            }
            Ok(Some(2))
        }
        TaskKind::Multiclass => {
            if labels.is_empty() {
                return Err(ModelError::Configuration(
                    "cannot derive the class count from an empty label set".to_string(),
                ));
            }
            let mut distinct = BTreeSet::new();
            for label in labels {
                if label.fract() != 0.0 || *label < 0.0 || !label.is_finite() {
                    return Err(ModelError::Configuration(format!(
                        "multiclass labels must be non-negative class indices, found {label}"
                    )));
                }
                distinct.insert(*label as u64);
            }
            let n_classes = if params.contains(NUM_CLASS_PARAM) {
                params.get_usize(NUM_CLASS_PARAM, 0)?
            } else {
                distinct.len()
            };
            if n_classes < 2 {
                return Err(ModelError::Configuration(format!(
                    "multiclass classification needs at least two classes, got {n_classes}"
                )));
            }
            if let Some(&max) = distinct.iter().next_back() {
                if max as usize >= n_classes {
                    return Err(ModelError::Configuration(format!(
                        "label {max} is outside 0..{n_classes}; labels must be class indices"
                    )));
                }
            }
            Ok(Some(n_classes))
        }
    }
}

/// Check labels against an already resolved class count (used for validation splits).
pub(crate) fn check_labels(task: TaskKind, labels: &[f64], n_classes: Option<usize>) -> ModelResult<()> {
    let Some(n_classes) = n_classes else {
        return Ok(());
    };
    let limit = n_classes as f64;
    match labels.iter().find(|l| l.fract() != 0.0 || **l < 0.0 || **l >= limit) {
        Some(bad) => Err(ModelError::Configuration(format!(
            "{task} label {bad} is outside the model's {n_classes} classes"
        ))),
        None => Ok(()),
    }
}

/// Return `params` with `num_class` filled in from the full label set.
///
/// Called before the train/test split so every split trains with the same class count.
pub fn inject_class_count(task: TaskKind, labels: &[f64], params: &Hyperparameters) -> ModelResult<Hyperparameters> {
    let mut params = params.clone();
    if task == TaskKind::Multiclass && !params.contains(NUM_CLASS_PARAM) {
        if let Some(n) = resolve_class_count(task, labels, &params)? {
            params.set(NUM_CLASS_PARAM, ParamValue::Int(n as i64));
        }
    }
    Ok(params)
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// In-place numerically stable softmax.
pub(crate) fn softmax(values: &mut [f64]) {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// Index of the largest value; ties go to the lowest index.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = idx;
        }
    }
    best
}

pub(crate) fn threshold(probability: f64) -> f64 {
    if probability > 0.5 { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_requires_zero_one() {
        let params = Hyperparameters::new();
        assert_eq!(resolve_class_count(TaskKind::Binary, &[0.0, 1.0, 1.0], &params).unwrap(), Some(2));
        assert!(matches!(
            resolve_class_count(TaskKind::Binary, &[0.0, 2.0], &params),
            Err(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn test_multiclass_counts_distinct_labels() {
        let params = Hyperparameters::new();
        let labels = [0.0, 2.0, 1.0, 2.0, 0.0];
        assert_eq!(resolve_class_count(TaskKind::Multiclass, &labels, &params).unwrap(), Some(3));
    }

    #[test]
    fn test_multiclass_without_derivable_count_fails() {
        let params = Hyperparameters::new();
        assert!(resolve_class_count(TaskKind::Multiclass, &[], &params).is_err());
        assert!(resolve_class_count(TaskKind::Multiclass, &[1.0, 1.0], &params).is_err());
        assert!(resolve_class_count(TaskKind::Multiclass, &[0.5, 1.0], &params).is_err());
        // Labels {0, 5} are two distinct values but not class indices.
        assert!(resolve_class_count(TaskKind::Multiclass, &[0.0, 5.0], &params).is_err());
    }

    #[test]
    fn test_inject_uses_full_label_set() {
        let full = [0.0, 1.0, 2.0];
        let params = inject_class_count(TaskKind::Multiclass, &full, &Hyperparameters::new()).unwrap();
        assert_eq!(params.get_usize(NUM_CLASS_PARAM, 0).unwrap(), 3);
        // A split missing class 2 still resolves to three classes.
        assert_eq!(resolve_class_count(TaskKind::Multiclass, &[0.0, 1.0], &params).unwrap(), Some(3));
    }

    #[test]
    fn test_decoding_helpers() {
        let mut v = vec![1.0, 3.0, 2.0];
        softmax(&mut v);
        assert!((v.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(argmax(&v), 1);
        assert!((threshold(0.5)).abs() < f64::EPSILON);
        assert!((threshold(0.51) - 1.0).abs() < f64::EPSILON);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
    }
}
