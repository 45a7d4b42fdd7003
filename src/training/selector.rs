//! Cross-validated choice between candidate model families

use super::cross_validation::{CVResults, CVSplit, CrossValidator};
use super::models::{FittedModel, ModelFamily, ModelMetrics, Regressor};
use crate::config::ModelSelectionConfig;
use crate::error::{AttributionError, Result};
use crate::preprocessing::StandardScaler;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Scores of one candidate family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub family: ModelFamily,
    /// Mean fold R²
    pub score: f64,
    /// Mean fold RMSE
    pub error: f64,
    pub folds: CVResults,
}

/// The refit winner of model selection
#[derive(Debug, Clone)]
pub struct SelectedModel {
    pub model: FittedModel,
    /// Fitted on all training rows; apply before `model.predict`
    pub scaler: StandardScaler,
    pub family: ModelFamily,
    pub score: f64,
    pub error: f64,
    pub candidate_scores: BTreeMap<ModelFamily, CandidateScore>,
}

impl SelectedModel {
    /// Predict on unscaled features
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let scaled = self.scaler.transform(x)?;
        self.model.predict(&scaled)
    }
}

/// Trains every candidate family under k-fold CV and refits the best one
#[derive(Debug, Clone)]
pub struct ModelSelector {
    config: ModelSelectionConfig,
}

impl ModelSelector {
    pub fn new(config: ModelSelectionConfig) -> Self {
        Self { config }
    }

    /// Pick a family by mean held-out R².
    ///
    /// The default family wins ties, and is also used whenever some
    /// candidate fails to fit. `x` is unscaled; each fold fits its own
    /// scaler on the training rows.
    pub fn select(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<SelectedModel> {
        let start = Instant::now();
        let default_family = self.config.default_family;
        let cv = CrossValidator::k_fold(self.config.cv_folds, true).with_random_state(self.config.random_state);
        let splits = cv
            .split(x.nrows())
            .map_err(|e| AttributionError::ModelFit(format!("cross-validation impossible: {}", e)))?;

        let mut candidates = self.config.candidates.clone();
        candidates.sort();
        candidates.dedup();

        let mut candidate_scores = BTreeMap::new();
        let mut any_failed = false;
        for family in candidates {
            match self.cross_validate(family, x, y, &splits) {
                Ok(folds) => {
                    debug!(family = %family, score = folds.mean_score, error = folds.mean_error, "Candidate scored");
                    candidate_scores.insert(
                        family,
                        CandidateScore {
                            family,
                            score: folds.mean_score,
                            error: folds.mean_error,
                            folds,
                        },
                    );
                }
                Err(e) => {
                    warn!(family = %family, error = %e, "Candidate failed to fit");
                    any_failed = true;
                }
            }
        }

        let chosen = Self::choose(&candidate_scores, default_family, any_failed);
        let (score, error) = candidate_scores
            .get(&chosen)
            .map_or((f64::NAN, f64::NAN), |c| (c.score, c.error));

        let mut scaler = StandardScaler::new();
        let x_scaled = scaler.fit_transform(x)?;
        let mut model = FittedModel::build(chosen, &self.config);
        model
            .fit(&x_scaled, y)
            .map_err(|e| AttributionError::ModelFit(format!("{} refit failed: {}", chosen, e)))?;

        info!(
            family = %chosen,
            score,
            error,
            candidates = candidate_scores.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model selected"
        );

        Ok(SelectedModel {
            model,
            scaler,
            family: chosen,
            score,
            error,
            candidate_scores,
        })
    }

    fn choose(
        scores: &BTreeMap<ModelFamily, CandidateScore>,
        default_family: ModelFamily,
        any_failed: bool,
    ) -> ModelFamily {
        if any_failed {
            return default_family;
        }
        let best = scores
            .values()
            .map(|c| c.score)
            .filter(|s| s.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        let leaders: Vec<ModelFamily> = scores
            .values()
            .filter(|c| c.score == best)
            .map(|c| c.family)
            .collect();
        match leaders.as_slice() {
            [only] => *only,
            _ => default_family,
        }
    }

    fn cross_validate(
        &self,
        family: ModelFamily,
        x: &Array2<f64>,
        y: &Array1<f64>,
        splits: &[CVSplit],
    ) -> Result<CVResults> {
        let mut scores = Vec::with_capacity(splits.len());
        let mut errors = Vec::with_capacity(splits.len());

        for split in splits {
            let x_train = x.select(Axis(0), &split.train_indices);
            let y_train = y.select(Axis(0), &split.train_indices);
            let x_test = x.select(Axis(0), &split.test_indices);
            let y_test = y.select(Axis(0), &split.test_indices);

            let mut scaler = StandardScaler::new();
            let x_train = scaler.fit_transform(&x_train)?;
            let x_test = scaler.transform(&x_test)?;

            let mut model = FittedModel::build(family, &self.config);
            model.fit(&x_train, &y_train)?;
            let predictions = model.predict(&x_test)?;
            if predictions.iter().any(|p| !p.is_finite()) {
                return Err(AttributionError::ModelFit(format!("{} produced non-finite predictions", family)));
            }

            let metrics = ModelMetrics::compute_regression(&y_test, &predictions);
            scores.push(metrics.r2);
            errors.push(metrics.rmse);
        }

        Ok(CVResults::from_folds(scores, errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(candidates: Vec<ModelFamily>) -> ModelSelectionConfig {
        ModelSelectionConfig {
            candidates,
            n_estimators: 10,
            cv_folds: 3,
            ..ModelSelectionConfig::default()
        }
    }

    fn linear_fixture() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| ((i * (3 + j * 4)) % 17) as f64);
        let y = x.column(0).mapv(|v| 1.5 * v) - &x.column(1).mapv(|v| 0.5 * v);
        (x, y)
    }

    #[test]
    fn test_linear_signal_prefers_ridge() {
        let (x, y) = linear_fixture();
        let selector = ModelSelector::new(small_config(vec![
            ModelFamily::GradientBoosting,
            ModelFamily::RandomForest,
            ModelFamily::Ridge,
        ]));
        let selected = selector.select(&x, &y).unwrap();

        assert_eq!(selected.family, ModelFamily::Ridge);
        assert_eq!(selected.candidate_scores.len(), 3);
        assert!(selected.score > 0.99);
        let pred = selected.predict(&x).unwrap();
        assert!((pred[3] - y[3]).abs() < 0.5);
    }

    #[test]
    fn test_single_candidate() {
        let (x, y) = linear_fixture();
        let selected = ModelSelector::new(small_config(vec![ModelFamily::RandomForest]))
            .select(&x, &y)
            .unwrap();
        assert_eq!(selected.family, ModelFamily::RandomForest);
    }

    #[test]
    fn test_tie_falls_back_to_default() {
        let mut scores = BTreeMap::new();
        for family in [ModelFamily::RandomForest, ModelFamily::Ridge] {
            scores.insert(
                family,
                CandidateScore {
                    family,
                    score: 0.5,
                    error: 1.0,
                    folds: CVResults::from_folds(vec![0.5], vec![1.0]),
                },
            );
        }
        assert_eq!(
            ModelSelector::choose(&scores, ModelFamily::GradientBoosting, false),
            ModelFamily::GradientBoosting
        );
        assert_eq!(
            ModelSelector::choose(&scores, ModelFamily::GradientBoosting, true),
            ModelFamily::GradientBoosting
        );
    }

    #[test]
    fn test_too_few_rows_is_model_fit_error() {
        let x = Array2::from_elem((1, 1), 1.0);
        let y = Array1::from_elem(1, 1.0);
        let err = ModelSelector::new(small_config(vec![ModelFamily::Ridge]))
            .select(&x, &y)
            .unwrap_err();
        assert!(matches!(err, AttributionError::ModelFit(_)));
    }
}
