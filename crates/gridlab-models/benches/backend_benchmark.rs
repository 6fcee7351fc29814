//! Fit and predict throughput for each backend on a synthetic dataset.

use criterion::{Criterion, criterion_group, criterion_main};
use gridlab_abstraction::{BackendKind, FeatureMatrix, Hyperparameters, ParamValue, Samples, TaskKind};
use gridlab_models::ModelFactory;
use std::hint::black_box;

fn synthetic(n: u32) -> Samples {
    let names = (0..8).map(|i| format!("f{i}")).collect();
    let rows: Vec<Vec<f64>> = (0..n).map(|i| (0..8).map(|j| f64::from((i * (j + 3)) % 17)).collect()).collect();
    let labels = rows.iter().map(|r| f64::from(u8::from(r[0] + r[1] > 16.0))).collect();
    Samples::new(FeatureMatrix::new(names, rows).expect("matrix"), labels).expect("samples")
}

fn bench_fit(c: &mut Criterion) {
    let data = synthetic(1000);
    let params = Hyperparameters::new()
        .with("num_boost_round", ParamValue::Int(20))
        .with("n_estimators", ParamValue::Int(20));

    let mut group = c.benchmark_group("fit_binary_1000x8");
    group.sample_size(10);
    for kind in BackendKind::ALL {
        group.bench_function(kind.as_str(), |b| {
            b.iter(|| {
                let mut model = ModelFactory::create(kind, TaskKind::Binary);
                model.fit(black_box(&data), None, &params).expect("fit");
            });
        });
    }
    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let data = synthetic(1000);
    let params = Hyperparameters::new().with("num_boost_round", ParamValue::Int(20));
    let mut group = c.benchmark_group("predict_binary_1000x8");
    for kind in BackendKind::ALL {
        let mut model = ModelFactory::create(kind, TaskKind::Binary);
        model.fit(&data, None, &params).expect("fit");
        group.bench_function(kind.as_str(), |b| b.iter(|| model.predict(black_box(&data.features)).expect("predict")));
    }
    group.finish();
}

criterion_group!(benches, bench_fit, bench_predict);
criterion_main!(benches);
