use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use onchain_analytics::diagnostics::linearity_report;
use onchain_analytics::pca::pca_denoise;
use onchain_analytics::{analyze_metrics, AnalyticsConfig, Column, ColumnData, FeatureMatrix, TimeSeriesTable};

fn generate_features(n_samples: usize, n_features: usize) -> FeatureMatrix {
    let values: Array2<f64> = Array::random((n_samples, n_features), Uniform::new(0., 10.));
    FeatureMatrix::new(
        (0..n_features).map(|j| format!("f{}", j)).collect(),
        vec![None; n_samples],
        values,
    )
    .unwrap()
}

fn generate_table(n_rows: usize) -> TimeSeriesTable {
    let prices = Array::random(n_rows, Uniform::new(1900., 2100.));
    let volume = Array::random(n_rows, Uniform::new(100., 1000.));
    let btc = Array::random(n_rows, Uniform::new(39000., 41000.));
    TimeSeriesTable::from_columns(vec![
        Column::new(
            "timestamp",
            ColumnData::Float((0..n_rows).map(|i| 1_700_000_000.0 + i as f64 * 3600.0).collect()),
        ),
        Column::new("close", ColumnData::Float(prices.to_vec())),
        Column::new("volume", ColumnData::Float(volume.to_vec())),
        Column::new("btc_close", ColumnData::Float(btc.to_vec())),
    ])
    .unwrap()
}

fn bench_pca_denoise(c: &mut Criterion) {
    let mut group = c.benchmark_group("pca_denoise");
    for &(n_samples, n_features) in [(720, 16), (1440, 16), (2000, 64)].iter() {
        let features = generate_features(n_samples, n_features);
        group.throughput(Throughput::Elements((n_samples * n_features) as u64));
        group.bench_with_input(
            BenchmarkId::new("denoise", format!("{}x{}", n_samples, n_features)),
            &features,
            |b, features| b.iter(|| pca_denoise(features, 0.95)),
        );
    }
    group.finish();
}

fn bench_linearity(c: &mut Criterion) {
    let mut group = c.benchmark_group("linearity_report");
    for &(n_samples, n_features) in [(720, 8), (1440, 16)].iter() {
        let features = generate_features(n_samples, n_features);
        group.bench_with_input(
            BenchmarkId::new("report", format!("{}x{}", n_samples, n_features)),
            &features,
            |b, features| b.iter(|| linearity_report(features)),
        );
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let config = AnalyticsConfig::default();
    let table = generate_table(1440);
    c.bench_function("analyze_metrics_1440h", |b| {
        b.iter_with_setup(|| table.clone(), |t| analyze_metrics(t, &config).unwrap())
    });
}

criterion_group!(benches, bench_pca_denoise, bench_linearity, bench_pipeline);
criterion_main!(benches);
