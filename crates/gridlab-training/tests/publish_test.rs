//! Store and pipeline working together: publish ordering, isolation and the registry.

use gridlab_abstraction::{BackendKind, CancelToken, Hyperparameters, TaskKind};
use gridlab_training::{
    Channel, CsvDatasetLoader, DatasetSchema, EvaluationRequest, NullProgressSink, Pipeline, RunStatus, RunStore,
    SvgReportRenderer, TrainingError, TrainingRequest,
};
use std::fmt::Write as _;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: Arc<RunStore>,
    pipeline: Pipeline,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let datasets = dir.path().join("datasets");
    std::fs::create_dir_all(&datasets).unwrap();

    let mut csv = String::from("dataset_id,f1,f2,f3,label\n");
    for i in 0..30 {
        let (a, b, c) = (f64::from(i), f64::from((i * 5) % 11), f64::from(i % 4));
        writeln!(csv, "d1,{a},{b},{c},{}", 3.0 * a + b - c).unwrap();
    }
    std::fs::write(datasets.join("grid.csv"), csv).unwrap();

    let store = Arc::new(RunStore::open(dir.path().join("results")).unwrap());
    let pipeline = Pipeline::new(
        Arc::new(CsvDatasetLoader::new(datasets, DatasetSchema::default())),
        Arc::new(SvgReportRenderer),
        Arc::new(NullProgressSink),
    );
    Fixture { _dir: dir, store, pipeline }
}

fn request(backend: BackendKind) -> TrainingRequest {
    TrainingRequest {
        dataset: "grid.csv".to_string(),
        label_column: "label".to_string(),
        backend,
        task: TaskKind::Regression,
        hyperparameters: Hyperparameters::new(),
    }
}

fn train_and_publish(fx: &Fixture, request: &TrainingRequest) -> gridlab_training::RunHandle {
    let handle = fx.store.begin_run(request.run_request()).unwrap();
    fx.store.mark_running(&handle).unwrap();
    let set = fx.pipeline.train(&handle.run_id, request, &CancelToken::new()).unwrap();
    fx.store.mark_succeeded(&handle, set).unwrap();
    handle
}

#[test]
fn test_latest_follows_last_publish() {
    let fx = fixture();
    let first = train_and_publish(&fx, &request(BackendKind::Linear));
    let second = train_and_publish(&fx, &request(BackendKind::RandomForest));

    let latest = fx.store.get_latest(Channel::Training).unwrap().unwrap();
    assert_eq!(latest.run.run_id, second.run_id);
    assert!(latest.metrics.get("rmse").is_some());
    assert!(latest.report.contains("Model: random_forest"));

    let models = fx.store.list_models().unwrap();
    assert_eq!(models.len(), 2);
    assert_ne!(models[0].storage_id, models[1].storage_id);
    assert!(models.iter().any(|m| m.run_id == first.run_id && m.backend == BackendKind::Linear));
    assert!(models.iter().any(|m| m.run_id == second.run_id && m.backend == BackendKind::RandomForest));
}

#[test]
fn test_concurrent_runs_publish_complete_sets() {
    let fx = fixture();
    std::thread::scope(|scope| {
        for backend in BackendKind::ALL {
            let fx = &fx;
            scope.spawn(move || train_and_publish(fx, &request(backend)));
        }
    });

    // Whichever run won, the pointer names a complete, self-consistent set.
    let latest = fx.store.get_latest(Channel::Training).unwrap().unwrap();
    assert_eq!(latest.run.status, RunStatus::Succeeded);
    assert_eq!(latest.manifest.run_id, latest.run.run_id);
    assert!(latest.report.contains(&format!("Model: {}", latest.run.request.backend)));
    for image in &latest.images {
        assert!(!fx.store.fetch_image(Channel::Training, image).unwrap().is_empty());
    }
    assert_eq!(fx.store.list_runs().unwrap().len(), 3);
    assert_eq!(fx.store.list_models().unwrap().len(), 3);
}

#[test]
fn test_failed_run_is_queryable_but_never_linked() {
    let fx = fixture();
    let good = train_and_publish(&fx, &request(BackendKind::Linear));

    let mut bad = request(BackendKind::Linear);
    bad.label_column = "absent".to_string();
    let handle = fx.store.begin_run(bad.run_request()).unwrap();
    fx.store.mark_running(&handle).unwrap();
    let err = fx.pipeline.train(&handle.run_id, &bad, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, TrainingError::Validation(_)));
    fx.store.mark_failed(&handle, &err.to_string()).unwrap();

    let record = fx.store.get_run(handle.run_id.as_str()).unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.unwrap().contains("absent"));
    assert_eq!(fx.store.get_latest(Channel::Training).unwrap().unwrap().run.run_id, good.run_id);
    assert_eq!(fx.store.list_models().unwrap().len(), 1);
}

#[test]
fn test_evaluation_publishes_to_testing_channel() {
    let fx = fixture();
    train_and_publish(&fx, &request(BackendKind::BoostedTree));
    let entry = fx.store.list_models().unwrap().remove(0);
    let resolved = fx.store.resolve_model(&entry.storage_id).unwrap();
    assert_eq!(resolved, entry);

    let evaluation = EvaluationRequest::from_entry(&entry, "grid.csv", "label");
    let handle = fx.store.begin_run(evaluation.run_request()).unwrap();
    assert_eq!(handle.channel, Channel::Testing);
    fx.store.mark_running(&handle).unwrap();
    let set = fx.pipeline.evaluate(&handle.run_id, &evaluation, &CancelToken::new()).unwrap();
    fx.store.mark_succeeded(&handle, set).unwrap();

    let latest = fx.store.get_latest(Channel::Testing).unwrap().unwrap();
    assert_eq!(latest.run.run_id, handle.run_id);
    assert!(latest.report.contains(&entry.storage_id));
    // Evaluation runs save no model of their own.
    assert_eq!(fx.store.list_models().unwrap().len(), 1);
    assert!(matches!(
        fx.store.resolve_model("run_missing/model_run_missing.json"),
        Err(TrainingError::ModelNotFound(_))
    ));
}
