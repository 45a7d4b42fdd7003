use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use sports_attribution::prelude::*;

fn create_league(n_teams: usize, n_features: usize) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let ids = (0..n_teams).map(|i| format!("team_{}", i)).collect();
    let names: Vec<String> = (0..n_features).map(|j| format!("stat_{}", j)).collect();
    let stats: Vec<Vec<f64>> = (0..n_features)
        .map(|_| (0..n_teams).map(|_| rng.gen::<f64>() * 10.0).collect())
        .collect();

    // Points driven by a weighted sum of the stats plus noise
    let points: Vec<f64> = (0..n_teams)
        .map(|i| {
            stats
                .iter()
                .enumerate()
                .map(|(j, s)| s[i] / (j + 1) as f64)
                .sum::<f64>()
                + rng.gen::<f64>() * 0.1
        })
        .collect();

    let mut columns: Vec<(&str, Vec<f64>)> = names.iter().map(String::as_str).zip(stats).collect();
    columns.push(("points", points));
    Dataset::from_numeric(ids, columns).unwrap()
}

fn bench_attribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribution");
    group.sample_size(10);

    let dataset = create_league(1000, 10);
    let mut config = EngineConfig::default();
    config.models.n_estimators = 30;
    let prepared = FeatureSelector::new(config.features.clone())
        .prepare(&dataset, "points")
        .unwrap();
    let monitor = ResourceMonitor::default();

    for family in [ModelFamily::GradientBoosting, ModelFamily::Ridge] {
        let mut models = config.models.clone();
        models.candidates = vec![family];
        let selected = ModelSelector::new(models)
            .select(&prepared.features, &prepared.target)
            .unwrap();

        for workers in [1, 4] {
            let computer = AttributionComputer::new(AttributionConfig {
                batch_size: 100,
                max_workers: workers,
                ..config.attribution.clone()
            });
            group.bench_with_input(
                BenchmarkId::new(format!("{}", family), workers),
                &computer,
                |b, computer| {
                    b.iter(|| {
                        let tracker = monitor.start("bench");
                        computer
                            .compute(black_box(&selected), black_box(&prepared), &tracker)
                            .unwrap()
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    let cache = MultiTierCache::builder().memory(256).build().unwrap();
    let payload: Vec<f64> = (0..10_000).map(|i| i as f64).collect();
    cache.set("bench", "payload", &payload, None);

    group.bench_function("l1_get", |b| {
        b.iter(|| cache.get::<Vec<f64>>(black_box("bench"), black_box("payload")).unwrap())
    });
    group.bench_function("set", |b| {
        b.iter(|| cache.set("bench", "payload", black_box(&payload), None))
    });

    group.finish();
}

criterion_group!(benches, bench_attribution, bench_cache);
criterion_main!(benches);
