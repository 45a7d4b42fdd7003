//! Attribution results and their summaries

use crate::error::{AttributionError, Result};
use crate::training::ModelFamily;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Mean absolute attribution of one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// How well the chosen model fit under cross-validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub family: ModelFamily,
    /// Mean held-out R²
    pub score: f64,
    /// Mean held-out RMSE
    pub error: f64,
    /// Mean held-out R² of every candidate that fit
    pub candidate_scores: BTreeMap<ModelFamily, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub feature_names: Vec<String>,
    pub target: String,
    /// Ids of the explained entities, in row order
    pub entity_ids: Vec<String>,
    pub n_entities: usize,
    pub analysis_type: Option<String>,
    /// Usable rows before sampling
    pub sampled_from: usize,
    pub failed_batches: usize,
    pub computed_at: DateTime<Utc>,
}

/// One cell of the long-form attribution table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAttribution {
    pub entity_id: String,
    pub feature: String,
    pub value: f64,
}

/// Flat, serialisable view of an [`AttributionResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub feature_importance: Vec<FeatureImportance>,
    pub per_entity_attribution: Vec<EntityAttribution>,
    pub model_performance: ModelPerformance,
    pub metadata: ResultMetadata,
}

/// Attributions of every explained entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    /// Descending by importance, ties by name
    pub feature_importance: Vec<FeatureImportance>,
    /// Entities × features
    pub attributions: Array2<f64>,
    pub base_value: f64,
    pub predictions: Array1<f64>,
    pub model_performance: ModelPerformance,
    pub metadata: ResultMetadata,
}

/// Order by descending value, then ascending name
fn by_value_then_name(a: (&str, f64), b: (&str, f64)) -> Ordering {
    b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(b.0))
}

/// Mean |φ| per feature, ranked
pub fn rank_importance(feature_names: &[String], attributions: &Array2<f64>) -> Vec<FeatureImportance> {
    let means = attributions
        .mapv(f64::abs)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(attributions.ncols()));
    let mut ranked: Vec<FeatureImportance> = feature_names
        .iter()
        .zip(means.iter())
        .map(|(name, &importance)| FeatureImportance {
            feature: name.clone(),
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| by_value_then_name((a.feature.as_str(), a.importance), (b.feature.as_str(), b.importance)));
    ranked
}

impl AttributionResult {
    pub fn new(
        attributions: Array2<f64>,
        base_value: f64,
        predictions: Array1<f64>,
        model_performance: ModelPerformance,
        metadata: ResultMetadata,
    ) -> Result<Self> {
        if attributions.nrows() != predictions.len() || attributions.nrows() != metadata.entity_ids.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("{} entities", metadata.entity_ids.len()),
                actual: format!("{} rows, {} predictions", attributions.nrows(), predictions.len()),
            });
        }
        if attributions.ncols() != metadata.feature_names.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("{} features", metadata.feature_names.len()),
                actual: format!("{} columns", attributions.ncols()),
            });
        }
        Ok(Self {
            feature_importance: rank_importance(&metadata.feature_names, &attributions),
            attributions,
            base_value,
            predictions,
            model_performance,
            metadata,
        })
    }

    pub fn n_entities(&self) -> usize {
        self.attributions.nrows()
    }

    pub fn importance_of(&self, feature: &str) -> Option<f64> {
        self.feature_importance
            .iter()
            .find(|f| f.feature == feature)
            .map(|f| f.importance)
    }

    /// Worst deviation of `base + Σφ` from the prediction, relative to
    /// `max(1, |prediction|)`. Errors when it exceeds `tolerance`.
    pub fn check_additivity(&self, tolerance: f64) -> Result<f64> {
        let worst = self
            .attributions
            .rows()
            .into_iter()
            .zip(self.predictions.iter())
            .map(|(phi, &prediction)| {
                let reconstructed = self.base_value + phi.sum();
                (reconstructed - prediction).abs() / prediction.abs().max(1.0)
            })
            .fold(0.0, f64::max);
        if worst > tolerance {
            return Err(AttributionError::Computation(format!(
                "attributions miss predictions by {:.3e} (tolerance {:.3e})",
                worst, tolerance
            )));
        }
        Ok(worst)
    }

    /// The `k` largest |φ| of entity row `row`, ties by name
    pub fn top_contributors(&self, row: usize, k: usize) -> Vec<(&str, f64)> {
        if row >= self.n_entities() {
            return Vec::new();
        }
        let mut cells: Vec<(&str, f64)> = self
            .metadata
            .feature_names
            .iter()
            .map(String::as_str)
            .zip(self.attributions.row(row).iter().copied())
            .collect();
        cells.sort_by(|a, b| by_value_then_name((a.0, a.1.abs()), (b.0, b.1.abs())));
        cells.truncate(k);
        cells
    }

    /// Long-form record: one attribution row per (entity, feature)
    pub fn to_record(&self) -> AttributionRecord {
        let per_entity_attribution = self
            .metadata
            .entity_ids
            .iter()
            .zip(self.attributions.rows())
            .flat_map(|(entity, phi)| {
                self.metadata
                    .feature_names
                    .iter()
                    .zip(phi.to_vec())
                    .map(move |(feature, value)| EntityAttribution {
                        entity_id: entity.clone(),
                        feature: feature.clone(),
                        value,
                    })
            })
            .collect();

        AttributionRecord {
            feature_importance: self.feature_importance.clone(),
            per_entity_attribution,
            model_performance: self.model_performance.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn summary(&self) -> ShapSummary {
        ShapSummary::from_matrix(&self.metadata.feature_names, &self.attributions)
    }
}

/// Distribution of attributions per feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapSummary {
    pub feature_names: Vec<String>,
    pub mean_abs_shap: Vec<f64>,
    pub mean_shap: Vec<f64>,
    /// Population standard deviation
    pub std_shap: Vec<f64>,
    pub min_shap: Vec<f64>,
    pub max_shap: Vec<f64>,
}

impl ShapSummary {
    /// Column statistics of an entities × features matrix. Statistics of an
    /// empty matrix are all zero.
    pub fn from_matrix(feature_names: &[String], attributions: &Array2<f64>) -> Self {
        let n_features = attributions.ncols();
        if attributions.nrows() == 0 {
            return Self {
                feature_names: feature_names.to_vec(),
                mean_abs_shap: vec![0.0; n_features],
                mean_shap: vec![0.0; n_features],
                std_shap: vec![0.0; n_features],
                min_shap: vec![0.0; n_features],
                max_shap: vec![0.0; n_features],
            };
        }

        let column_stat = |f: &dyn Fn(ndarray::ArrayView1<f64>) -> f64| -> Vec<f64> {
            attributions.columns().into_iter().map(f).collect()
        };
        let n = attributions.nrows() as f64;

        Self {
            feature_names: feature_names.to_vec(),
            mean_abs_shap: column_stat(&|c| c.iter().map(|v| v.abs()).sum::<f64>() / n),
            mean_shap: column_stat(&|c| c.sum() / n),
            std_shap: column_stat(&|c| c.std(0.0)),
            min_shap: column_stat(&|c| c.iter().copied().fold(f64::INFINITY, f64::min)),
            max_shap: column_stat(&|c| c.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        }
    }

    /// Features by mean |φ|, descending, ties by name
    pub fn feature_ranking(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.mean_abs_shap.iter().copied())
            .collect();
        ranked.sort_by(|a, b| by_value_then_name((a.0.as_str(), a.1), (b.0.as_str(), b.1)));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn result() -> AttributionResult {
        let names = vec!["assists".to_string(), "goals".to_string(), "saves".to_string()];
        AttributionResult::new(
            array![[1.0, -2.0, 0.5], [-1.0, 2.0, 0.0]],
            10.0,
            array![9.5, 11.0],
            ModelPerformance {
                family: ModelFamily::Ridge,
                score: 0.9,
                error: 0.3,
                candidate_scores: BTreeMap::from([(ModelFamily::Ridge, 0.9)]),
            },
            ResultMetadata {
                feature_names: names,
                target: "points".to_string(),
                entity_ids: vec!["t1".to_string(), "t2".to_string()],
                n_entities: 2,
                analysis_type: None,
                sampled_from: 2,
                failed_batches: 0,
                computed_at: Utc::now(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_importance_ranking() {
        let r = result();
        let names: Vec<&str> = r.feature_importance.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(names, vec!["goals", "assists", "saves"]);
        assert_eq!(r.importance_of("goals"), Some(2.0));
        assert_eq!(r.importance_of("fouls"), None);
    }

    #[test]
    fn test_ties_break_by_name() {
        let names = vec!["b".to_string(), "a".to_string()];
        let ranked = rank_importance(&names, &array![[1.0, -1.0]]);
        assert_eq!(ranked[0].feature, "a");
        assert_eq!(ranked[1].feature, "b");
    }

    #[test]
    fn test_additivity_check() {
        let r = result();
        assert!(r.check_additivity(1e-9).unwrap() < 1e-12);

        let mut broken = r.clone();
        broken.predictions[0] = 50.0;
        assert!(broken.check_additivity(1e-6).is_err());
    }

    #[test]
    fn test_long_form_record() {
        let record = result().to_record();
        assert_eq!(record.per_entity_attribution.len(), 6);
        assert_eq!(record.per_entity_attribution[4].entity_id, "t2");
        assert_eq!(record.per_entity_attribution[4].feature, "goals");
        assert_eq!(record.per_entity_attribution[4].value, 2.0);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json["feature_importance"].is_array());
        assert_eq!(json["metadata"]["target"], "points");
    }

    #[test]
    fn test_top_contributors() {
        let r = result();
        let top = r.top_contributors(0, 2);
        assert_eq!(top, vec![("goals", -2.0), ("assists", 1.0)]);
        assert!(r.top_contributors(5, 2).is_empty());
    }

    #[test]
    fn test_summary_statistics() {
        let summary = result().summary();
        assert_eq!(summary.mean_abs_shap, vec![1.0, 2.0, 0.25]);
        assert_eq!(summary.mean_shap, vec![0.0, 0.0, 0.25]);
        assert_eq!(summary.std_shap[0], 1.0);
        assert_eq!(summary.min_shap[1], -2.0);
        assert_eq!(summary.max_shap[2], 0.5);
        assert_eq!(summary.feature_ranking()[0].0, "goals");
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let r = result();
        let err = AttributionResult::new(
            Array2::zeros((3, 3)),
            0.0,
            Array1::zeros(2),
            r.model_performance.clone(),
            r.metadata.clone(),
        );
        assert!(matches!(err, Err(AttributionError::ShapeError { .. })));
    }
}
