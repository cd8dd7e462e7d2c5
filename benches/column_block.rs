use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kuba_fanout::block::{Block, Bounds, ColumnBlockBuilder, Metadata, SeriesMeta};
use kuba_fanout::context::QueryContext;
use kuba_fanout::storage::stubs::InMemoryStorage;
use kuba_fanout::storage::{FanoutStorageBuilder, FetchOptions, FetchQuery, StorageType};
use kuba_fanout::types::{Datapoint, Matcher, Series, Tags};
use std::time::Duration;

const SERIES: usize = 100;

fn metadata(steps: usize) -> Metadata {
    Metadata::new(Bounds::new(
        0,
        Duration::from_secs(steps as u64),
        Duration::from_secs(1),
    ))
}

fn series_meta() -> Vec<SeriesMeta> {
    (0..SERIES)
        .map(|i| SeriesMeta::new(format!("series_{}", i), Tags::new()))
        .collect()
}

fn build_block(steps: usize, row: &[f64]) -> kuba_fanout::block::AccountedBlock {
    let ctx = QueryContext::default();
    let mut builder = ColumnBlockBuilder::new(&ctx, metadata(steps), series_meta());
    builder.add_cols(steps).unwrap();
    for idx in 0..steps {
        builder.append_values(idx, row).unwrap();
    }
    builder.build()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("column_block_build");
    let row: Vec<f64> = (0..SERIES).map(|i| i as f64 * 0.5).collect();

    for steps in [60, 360, 1440].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(steps), steps, |b, &steps| {
            b.iter(|| black_box(build_block(steps, &row)));
        });
    }

    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("column_block_iterate");
    let row: Vec<f64> = (0..SERIES).map(|i| i as f64 * 0.5).collect();

    for steps in [60, 360, 1440].iter() {
        let block = build_block(*steps, &row);

        group.bench_with_input(BenchmarkId::new("steps", steps), steps, |b, _| {
            b.iter(|| {
                let sum: f64 = block
                    .step_iter()
                    .unwrap()
                    .map(|s| s.values().iter().sum::<f64>())
                    .sum();
                black_box(sum)
            });
        });

        group.bench_with_input(BenchmarkId::new("series", steps), steps, |b, _| {
            b.iter(|| {
                let sum: f64 = block
                    .series_iter()
                    .unwrap()
                    .map(|s| s.values().iter().sum::<f64>())
                    .sum();
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn bench_fanout_fetch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("fanout_fetch");

    for backends in [1, 4, 16].iter() {
        let mut builder = FanoutStorageBuilder::new();
        for b in 0..*backends {
            let store = InMemoryStorage::new(format!("store_{}", b), StorageType::RemoteDc);
            for s in 0..SERIES {
                let tags = Tags::new()
                    .with_tag("__name__", "cpu")
                    .with_tag("host", format!("host_{}", s));
                store.insert_series(Series::new(
                    tags.id(),
                    tags,
                    (0..60).map(|t| Datapoint::new(t * 1_000, t as f64)).collect(),
                ));
            }
            builder = builder.with_backend(store);
        }
        let fanout = builder.build().unwrap();
        let query = FetchQuery::new(vec![Matcher::equal("__name__", "cpu")], 0, 60_000);
        let options = FetchOptions::new();

        group.bench_with_input(BenchmarkId::from_parameter(backends), backends, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    black_box(fanout.fetch(Some(&query), &options).await.unwrap())
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_iterate, bench_fanout_fetch);
criterion_main!(benches);
