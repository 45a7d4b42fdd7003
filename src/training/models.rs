//! Model families and the common regression interface

use super::gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
use super::linear_models::RidgeRegression;
use super::random_forest::{RandomForest, RandomForestConfig};
use crate::config::ModelSelectionConfig;
use crate::error::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Regression metrics for model evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    /// 0 when the target is constant
    pub r2: f64,
    pub n_samples: usize,
}

impl ModelMetrics {
    pub fn compute_regression(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let n = y_true.len();
        if n == 0 {
            return Self::default();
        }
        let nf = n as f64;
        let errors: Vec<f64> = y_true.iter().zip(y_pred.iter()).map(|(t, p)| t - p).collect();

        let ss_res: f64 = errors.iter().map(|e| e * e).sum();
        let mse = ss_res / nf;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / nf;

        let y_mean = y_true.sum() / nf;
        let ss_tot: f64 = y_true.iter().map(|y| (y - y_mean).powi(2)).sum();
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        Self {
            mse,
            rmse: mse.sqrt(),
            mae,
            r2,
            n_samples: n,
        }
    }
}

/// Candidate regression families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelFamily {
    GradientBoosting,
    RandomForest,
    Ridge,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::GradientBoosting => "gradient_boosting",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::Ridge => "ridge",
        }
    }

    /// Whether attributions can use the exact tree algorithm
    pub fn is_tree_ensemble(&self) -> bool {
        !matches!(self, ModelFamily::Ridge)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common interface of the regression models
pub trait Regressor: Send + Sync {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;
}

impl Regressor for GradientBoostingRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        GradientBoostingRegressor::fit(self, x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        GradientBoostingRegressor::predict(self, x)
    }
}

impl Regressor for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        RandomForest::fit(self, x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        RandomForest::predict(self, x)
    }
}

impl Regressor for RidgeRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        RidgeRegression::fit(self, x, y).map(|_| ())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        RidgeRegression::predict(self, x)
    }
}

/// A model of one of the candidate families
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FittedModel {
    GradientBoosting(GradientBoostingRegressor),
    RandomForest(RandomForest),
    Ridge(RidgeRegression),
}

impl FittedModel {
    /// Unfitted model of `family` configured from `config`
    pub fn build(family: ModelFamily, config: &ModelSelectionConfig) -> Self {
        match family {
            ModelFamily::GradientBoosting => {
                FittedModel::GradientBoosting(GradientBoostingRegressor::new(GradientBoostingConfig {
                    n_estimators: config.n_estimators,
                    learning_rate: config.learning_rate,
                    max_depth: config.max_depth,
                    random_state: config.random_state,
                    ..GradientBoostingConfig::default()
                }))
            }
            ModelFamily::RandomForest => FittedModel::RandomForest(RandomForest::new(RandomForestConfig {
                n_estimators: config.n_estimators,
                max_depth: Some(config.max_depth * 2),
                random_state: config.random_state,
                ..RandomForestConfig::default()
            })),
            ModelFamily::Ridge => FittedModel::Ridge(RidgeRegression::new(config.ridge_alpha)),
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            FittedModel::GradientBoosting(_) => ModelFamily::GradientBoosting,
            FittedModel::RandomForest(_) => ModelFamily::RandomForest,
            FittedModel::Ridge(_) => ModelFamily::Ridge,
        }
    }

    fn as_regressor(&self) -> &dyn Regressor {
        match self {
            FittedModel::GradientBoosting(m) => m,
            FittedModel::RandomForest(m) => m,
            FittedModel::Ridge(m) => m,
        }
    }

    fn as_regressor_mut(&mut self) -> &mut dyn Regressor {
        match self {
            FittedModel::GradientBoosting(m) => m,
            FittedModel::RandomForest(m) => m,
            FittedModel::Ridge(m) => m,
        }
    }
}

impl Regressor for FittedModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.as_regressor_mut().fit(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.as_regressor().predict(x)
    }
}
