//! Integration tests for the model backends through the factory.

use gridlab_abstraction::{
    BackendKind, CancelToken, FeatureMatrix, Hyperparameters, ModelError, ParamValue, Samples, TaskKind,
};
use gridlab_models::{ModelFactory, inject_class_count};
use tempfile::TempDir;

fn names() -> Vec<String> {
    vec!["x1".to_string(), "x2".to_string(), "x3".to_string()]
}

/// Three features, labels derived from the first two.
fn dataset(task: TaskKind) -> Samples {
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for i in 0..60 {
        let x1 = f64::from(i % 10);
        let x2 = f64::from((i * 3) % 7);
        let x3 = f64::from((i * 11) % 5) * 0.5;
        let label = match task {
            TaskKind::Regression => 2.0 * x1 - x2 + 0.5,
            TaskKind::Binary => f64::from(u8::from(x1 >= 5.0)),
            TaskKind::Multiclass => (x1 / 4.0).floor().min(2.0),
        };
        rows.push(vec![x1, x2, x3]);
        labels.push(label);
    }
    Samples::new(FeatureMatrix::new(names(), rows).unwrap(), labels).unwrap()
}

fn small_params() -> Hyperparameters {
    Hyperparameters::new()
        .with("num_boost_round", ParamValue::Int(15))
        .with("n_estimators", ParamValue::Int(10))
}

#[test]
fn test_every_backend_round_trips_bit_identically() {
    let dir = TempDir::new().unwrap();
    for kind in BackendKind::ALL {
        for task in TaskKind::ALL {
            let data = dataset(task);
            let params = inject_class_count(task, &data.labels, &small_params()).unwrap();
            let mut model = ModelFactory::create(kind, task);
            model.fit(&data, None, &params).unwrap();

            let path = dir.path().join(format!("model_{kind}_{task}.json"));
            model.save(&path).unwrap();
            let restored = ModelFactory::load(&path).unwrap();

            assert_eq!(restored.kind(), kind);
            assert_eq!(restored.task(), task);
            assert_eq!(restored.n_classes(), model.n_classes(), "{kind}/{task} lost its class count");
            assert_eq!(
                model.predict(&data.features).unwrap(),
                restored.predict(&data.features).unwrap(),
                "{kind}/{task} predictions changed after reload"
            );
            assert_eq!(ModelFactory::detect(&path).unwrap(), (kind, task));
        }
    }
}

#[test]
fn test_backends_are_substitutable() {
    for kind in BackendKind::ALL {
        let data = dataset(TaskKind::Binary);
        let mut model = ModelFactory::create(kind, TaskKind::Binary);
        let report = model.fit(&data, None, &small_params()).unwrap();
        assert_eq!(report.n_classes, Some(2));
        let predictions = model.predict(&data.features).unwrap();
        assert_eq!(predictions.len(), data.len());
        assert!(predictions.iter().all(|p| *p == 0.0 || *p == 1.0), "{kind} emitted a non 0/1 label");
    }
}

#[test]
fn test_multiclass_predictions_are_class_indices() {
    for kind in BackendKind::ALL {
        let data = dataset(TaskKind::Multiclass);
        let mut model = ModelFactory::create(kind, TaskKind::Multiclass);
        model.fit(&data, None, &small_params()).unwrap();
        for p in model.predict(&data.features).unwrap() {
            assert!(p == 0.0 || p == 1.0 || p == 2.0, "{kind} emitted {p}");
        }
    }
}

#[test]
fn test_untrained_models_refuse_inference() {
    let data = dataset(TaskKind::Regression);
    for kind in BackendKind::ALL {
        let model = ModelFactory::create(kind, TaskKind::Regression);
        assert!(!model.is_trained());
        assert_eq!(model.n_classes(), None);
        assert_eq!(model.predict(&data.features), Err(ModelError::NotTrained));
    }
}

#[test]
fn test_multiclass_without_class_count_is_configuration_error() {
    let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
    let data = Samples::new(FeatureMatrix::new(names(), rows).unwrap(), vec![1.0, 1.0]).unwrap();
    for kind in BackendKind::ALL {
        let mut model = ModelFactory::create(kind, TaskKind::Multiclass);
        let err = model.fit(&data, None, &Hyperparameters::new()).unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)), "{kind}: {err}");
    }
}

#[test]
fn test_predict_rejects_mismatched_columns() {
    let data = dataset(TaskKind::Regression);
    let mut model = ModelFactory::create(BackendKind::Linear, TaskKind::Regression);
    model.fit(&data, None, &Hyperparameters::new()).unwrap();
    let other = FeatureMatrix::new(vec!["x1".to_string()], vec![vec![1.0]]).unwrap();
    assert!(matches!(model.predict(&other), Err(ModelError::InvalidInput(_))));
}

#[test]
fn test_loading_garbage_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model_bad.json");
    std::fs::write(&path, b"{\"hello\": 1}").unwrap();
    assert!(matches!(ModelFactory::load(&path), Err(ModelError::Serialization(_))));
    assert!(matches!(ModelFactory::load(&dir.path().join("missing.json")), Err(ModelError::Io(_))));
}

#[test]
fn test_every_backend_reports_importance() {
    let data = dataset(TaskKind::Regression);
    for kind in BackendKind::ALL {
        let mut model = ModelFactory::create(kind, TaskKind::Regression);
        model.fit(&data, None, &small_params()).unwrap();
        let importance = model.feature_importance().unwrap();
        assert_eq!(importance.len(), 3);
        assert!(importance.windows(2).all(|w| w[0].score >= w[1].score));
    }
}

#[test]
fn test_cancelled_token_stops_iterative_fits() {
    let data = dataset(TaskKind::Binary);
    for kind in BackendKind::ALL {
        let token = CancelToken::new();
        let mut model = ModelFactory::create(kind, TaskKind::Binary);
        model.set_cancel_token(token.clone());
        token.cancel();
        assert_eq!(model.fit(&data, None, &small_params()).unwrap_err(), ModelError::Cancelled, "{kind}");
        assert!(!model.is_trained());
    }
}
