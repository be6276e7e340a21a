use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array2, Array3};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use timely_anomaly::anomaly::{
    AnomalyDetector, IsolationForest, IsolationForestConfig, PcaConfig, PcaReconstructor,
    ReconstructionDetector,
};
use timely_anomaly::windowing::sliding_window_matrix;

fn create_series(n_rows: usize, n_features: usize) -> Array2<f64> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
    Array2::from_shape_fn((n_rows, n_features), |(i, j)| {
        (i as f64 * 0.01 * (j + 1) as f64).sin() + rng.gen::<f64>() * 0.05
    })
}

fn create_windows(n_windows: usize) -> Array3<f64> {
    let series = create_series(n_windows + 79, 4);
    sliding_window_matrix(&series, 80, 1).unwrap()
}

fn bench_windowing(c: &mut Criterion) {
    let mut group = c.benchmark_group("windowing");

    for n_rows in [1_000, 10_000].iter() {
        let series = create_series(*n_rows, 4);
        group.bench_with_input(BenchmarkId::new("sliding_window", n_rows), &series, |b, s| {
            b.iter(|| sliding_window_matrix(black_box(s), 80, 1).unwrap())
        });
    }

    group.finish();
}

fn bench_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");
    group.sample_size(10);

    let train = create_windows(500);
    for n_windows in [100, 1_000].iter() {
        let test = create_windows(*n_windows);

        let mut pca = ReconstructionDetector::new(PcaReconstructor::new(PcaConfig::default()));
        pca.fit(&train).unwrap();
        group.bench_with_input(BenchmarkId::new("pca", n_windows), &test, |b, x| {
            b.iter(|| pca.score_samples(black_box(x)).unwrap())
        });

        let mut forest = IsolationForest::new(IsolationForestConfig::default());
        forest.fit(&train).unwrap();
        group.bench_with_input(BenchmarkId::new("isolation_forest", n_windows), &test, |b, x| {
            b.iter(|| forest.score_samples(black_box(x)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_windowing, bench_scoring);
criterion_main!(benches);
