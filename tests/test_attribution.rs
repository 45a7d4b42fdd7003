//! Integration tests for attribution: additivity, determinism, batching

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sports_attribution::prelude::*;

/// `teams` rows of `features` stats plus a `points` target driven by the
/// first few of them
fn league(teams: usize, features: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let ids = (0..teams).map(|i| format!("team_{:03}", i)).collect();
    let stats: Vec<Vec<f64>> = (0..features)
        .map(|_| (0..teams).map(|_| rng.gen_range(0.0..20.0)).collect())
        .collect();
    let points: Vec<f64> = (0..teams)
        .map(|i| {
            let mut p = 3.0 * stats[0][i];
            if features > 1 {
                p -= 1.5 * stats[1][i];
            }
            if features > 2 {
                p += 0.1 * stats[2][i] * stats[0][i];
            }
            p + rng.gen_range(-1.0..1.0)
        })
        .collect();

    let names: Vec<String> = (0..features).map(|j| format!("stat_{}", j)).collect();
    let mut columns: Vec<(&str, Vec<f64>)> = names.iter().map(|n| n.as_str()).zip(stats).collect();
    columns.push(("points", points));
    Dataset::from_numeric(ids, columns).unwrap()
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default().with_cache_enabled(false).with_max_workers(4);
    config.models.n_estimators = 20;
    config.models.cv_folds = 3;
    config
}

#[test]
fn test_fifty_teams_ten_features() {
    let engine = AnalysisEngine::new(config()).unwrap();
    let request = AnalysisRequest::builder("points", engine.config())
        .batch_size(10)
        .analysis_type("team_performance")
        .build()
        .unwrap();
    let outcome = engine.analyze(&league(50, 10, 7), &request).unwrap();
    let result = &outcome.result;

    assert_eq!(result.feature_importance.len(), 10);
    let total: f64 = result.feature_importance.iter().map(|f| f.importance).sum();
    assert!(total > 0.0);
    assert!(result
        .feature_importance
        .windows(2)
        .all(|w| w[0].importance >= w[1].importance));

    let record = result.to_record();
    assert_eq!(record.per_entity_attribution.len(), 500);
    assert_eq!(record.metadata.n_entities, 50);
    assert_eq!(record.metadata.analysis_type.as_deref(), Some("team_performance"));
    assert_eq!(record.metadata.failed_batches, 0);
    assert_eq!(outcome.metrics.rows_processed, 50);

    let json = serde_json::to_value(&record).unwrap();
    assert!(json["feature_importance"][0]["feature"].is_string());
    assert!(json["model_performance"]["score"].is_number());
}

#[test]
fn test_attributions_sum_to_prediction() {
    for family in [ModelFamily::GradientBoosting, ModelFamily::RandomForest, ModelFamily::Ridge] {
        let engine = AnalysisEngine::new(config().with_candidates(vec![family])).unwrap();
        let request = AnalysisRequest::builder("points", engine.config()).build().unwrap();
        let result = engine.analyze(&league(40, 4, 11), &request).unwrap().result;

        assert_eq!(result.model_performance.family, family);
        let worst = result.check_additivity(1e-6).unwrap();
        assert!(worst < 1e-6, "{}: {}", family, worst);
    }
}

#[test]
fn test_same_inputs_same_attributions() {
    let data = league(30, 5, 3);
    let a = AnalysisEngine::new(config()).unwrap();
    let b = AnalysisEngine::new(config()).unwrap();
    let request = AnalysisRequest::builder("points", a.config()).build().unwrap();

    let first = a.analyze(&data, &request).unwrap().result;
    let second = b.analyze(&data, &request).unwrap().result;
    assert_eq!(first.attributions, second.attributions);
    assert_eq!(first.feature_importance, second.feature_importance);
    assert_eq!(first.model_performance, second.model_performance);
}

#[test]
fn test_batch_size_does_not_change_attributions() {
    let data = league(60, 6, 5);
    for family in [ModelFamily::GradientBoosting, ModelFamily::Ridge] {
        let engine = AnalysisEngine::new(config().with_candidates(vec![family])).unwrap();
        let run = |batch_size: usize| {
            let request = AnalysisRequest::builder("points", engine.config())
                .batch_size(batch_size)
                .build()
                .unwrap();
            engine.analyze(&data, &request).unwrap().result
        };

        let reference = run(1000);
        for batch_size in [10, 50] {
            let other = run(batch_size);
            let max_diff = (&other.attributions - &reference.attributions)
                .iter()
                .fold(0.0f64, |m, d| m.max(d.abs()));
            assert!(max_diff < 1e-9, "{} batch {}: {}", family, batch_size, max_diff);
            assert_eq!(other.metadata.entity_ids, reference.metadata.entity_ids);
        }
    }
}

#[test]
fn test_subsampling_caps_entities() {
    let engine = AnalysisEngine::new(config()).unwrap();
    let request = AnalysisRequest::builder("points", engine.config())
        .sampling_bounds(10, 25)
        .build()
        .unwrap();
    let result = engine.analyze(&league(80, 3, 9), &request).unwrap().result;

    assert_eq!(result.n_entities(), 25);
    assert_eq!(result.metadata.sampled_from, 80);
    let ids = &result.metadata.entity_ids;
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_memory_efficient_mode_matches_default() {
    let data = league(40, 4, 21);
    let engine = AnalysisEngine::new(config()).unwrap();
    let plain = AnalysisRequest::builder("points", engine.config()).batch_size(20).build().unwrap();
    let lean = AnalysisRequest::builder("points", engine.config())
        .batch_size(20)
        .memory_efficient(true)
        .build()
        .unwrap();

    let a = engine.analyze(&data, &plain).unwrap().result;
    let b = engine.analyze(&data, &lean).unwrap().result;
    assert_eq!(a.attributions, b.attributions);
}

#[test]
fn test_single_feature() {
    let engine = AnalysisEngine::new(config()).unwrap();
    let request = AnalysisRequest::builder("points", engine.config()).build().unwrap();
    let result = engine.analyze(&league(20, 1, 2), &request).unwrap().result;

    assert_eq!(result.feature_importance.len(), 1);
    assert_eq!(result.feature_importance[0].feature, "stat_0");
    assert!(result.check_additivity(1e-6).is_ok());
}

#[test]
fn test_target_only_table() {
    let ids = (0..20).map(|i| format!("team_{:03}", i)).collect();
    let points: Vec<f64> = (0..20).map(|i| (i % 7) as f64 * 3.0).collect();
    let data = Dataset::from_numeric(ids, vec![("points", points)]).unwrap();

    for family in [ModelFamily::GradientBoosting, ModelFamily::RandomForest, ModelFamily::Ridge] {
        let engine = AnalysisEngine::new(config().with_candidates(vec![family])).unwrap();
        let request = AnalysisRequest::builder("points", engine.config()).build().unwrap();
        let result = engine.analyze(&data, &request).unwrap().result;

        assert_eq!(result.model_performance.family, family);
        assert!(result.feature_importance.is_empty());
        assert!(result.metadata.feature_names.is_empty());
        assert_eq!(result.n_entities(), 20);
        assert_eq!(result.attributions.dim(), (20, 0));
        assert!(result.to_record().per_entity_attribution.is_empty());
        assert!(result.check_additivity(1e-6).is_ok(), "{}", family);
    }
}

#[test]
fn test_summary_and_top_contributors() {
    let engine = AnalysisEngine::new(config()).unwrap();
    let request = AnalysisRequest::builder("points", engine.config()).build().unwrap();
    let result = engine.analyze(&league(30, 4, 13), &request).unwrap().result;

    let summary = result.summary();
    assert_eq!(summary.feature_names.len(), 4);
    let ranking = summary.feature_ranking();
    assert_eq!(ranking[0].0, result.feature_importance[0].feature);

    let top = result.top_contributors(0, 2);
    assert_eq!(top.len(), 2);
    assert!(top[0].1.abs() >= top[1].1.abs());
}
