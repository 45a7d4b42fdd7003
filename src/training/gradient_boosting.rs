//! Gradient boosting regressor
//!
//! Least-squares boosting of shallow regression trees with row and
//! column subsampling per round.

use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::decision_tree::DecisionTree;
use crate::error::{AttributionError, Result};

/// Gradient Boosting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingConfig {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Learning rate (shrinkage)
    pub learning_rate: f64,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Minimum samples per leaf
    pub min_samples_leaf: usize,
    /// Subsample ratio for each tree
    pub subsample: f64,
    /// Column subsample ratio
    pub colsample_bytree: f64,
    /// Random seed
    pub random_state: u64,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 4,
            min_samples_leaf: 1,
            subsample: 0.8,
            colsample_bytree: 0.8,
            random_state: 42,
        }
    }
}

/// Gradient Boosting Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    config: GradientBoostingConfig,
    trees: Vec<DecisionTree>,
    col_indices_per_tree: Vec<Vec<usize>>,
    initial_prediction: f64,
    feature_importances: Vec<f64>,
    n_features: usize,
}

impl GradientBoostingRegressor {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            col_indices_per_tree: Vec::new(),
            initial_prediction: 0.0,
            feature_importances: Vec::new(),
            n_features: 0,
        }
    }

    /// Fit the gradient boosting model
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(AttributionError::ModelFit("cannot boost on zero rows".to_string()));
        }

        self.trees.clear();
        self.col_indices_per_tree.clear();
        self.n_features = n_features;
        self.initial_prediction = y.mean().unwrap_or(0.0);
        self.feature_importances = vec![0.0; n_features];

        let mut predictions = Array1::from_elem(n_samples, self.initial_prediction);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);

        for round in 0..self.config.n_estimators {
            let residuals = y - &predictions;

            let sample_indices = Self::draw(n_samples, self.config.subsample, &mut rng);
            let col_indices = Self::draw(n_features, self.config.colsample_bytree, &mut rng);

            let x_sub = x.select(Axis(0), &sample_indices).select(Axis(1), &col_indices);
            let y_sub = residuals.select(Axis(0), &sample_indices);

            let mut tree = DecisionTree::new()
                .with_max_depth(self.config.max_depth)
                .with_min_samples_leaf(self.config.min_samples_leaf)
                .with_random_state(self.config.random_state.wrapping_add(round as u64));
            tree.fit(&x_sub, &y_sub)?;

            // every row moves, not only the ones the tree was fitted on
            let tree_pred = tree.predict(&x.select(Axis(1), &col_indices))?;
            predictions.scaled_add(self.config.learning_rate, &tree_pred);

            if let Some(tree_importance) = tree.feature_importances() {
                for (j, &col_idx) in col_indices.iter().enumerate() {
                    self.feature_importances[col_idx] += tree_importance[j];
                }
            }

            self.trees.push(tree);
            self.col_indices_per_tree.push(col_indices);
        }

        let total: f64 = self.feature_importances.iter().sum();
        if total > 0.0 {
            for imp in &mut self.feature_importances {
                *imp /= total;
            }
        }

        Ok(())
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() && self.config.n_estimators > 0 {
            return Err(AttributionError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(AttributionError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut predictions = Array1::from_elem(x.nrows(), self.initial_prediction);
        for (tree, col_indices) in self.trees.iter().zip(&self.col_indices_per_tree) {
            let tree_pred = tree.predict(&x.select(Axis(1), col_indices))?;
            predictions.scaled_add(self.config.learning_rate, &tree_pred);
        }
        Ok(predictions)
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Original column index for each tree's local feature index
    pub fn col_indices_per_tree(&self) -> &[Vec<usize>] {
        &self.col_indices_per_tree
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    pub fn initial_prediction(&self) -> f64 {
        self.initial_prediction
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    fn draw(n: usize, ratio: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
        let size = ((n as f64) * ratio.clamp(0.0, 1.0)).ceil() as usize;
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(rng);
        indices.truncate(size.min(n));
        indices.sort_unstable();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fixture() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 3), |(i, j)| ((i * (j + 2)) % 11) as f64 + j as f64 * 0.5);
        let y = x.column(0).mapv(|v| 2.0 * v) + &x.column(2).mapv(|v| v * v * 0.1);
        (x, y)
    }

    #[test]
    fn test_fit_reduces_error() {
        let (x, y) = fixture();
        let mut gb = GradientBoostingRegressor::new(GradientBoostingConfig {
            n_estimators: 50,
            ..Default::default()
        });
        gb.fit(&x, &y).unwrap();

        let pred = gb.predict(&x).unwrap();
        let mean = y.mean().unwrap();
        let sse: f64 = pred.iter().zip(y.iter()).map(|(p, t)| (p - t).powi(2)).sum();
        let sst: f64 = y.iter().map(|t| (t - mean).powi(2)).sum();
        assert!(sse / sst < 0.1, "relative error {}", sse / sst);
    }

    #[test]
    fn test_accessors_describe_the_ensemble() {
        let (x, y) = fixture();
        let mut gb = GradientBoostingRegressor::new(GradientBoostingConfig {
            n_estimators: 5,
            colsample_bytree: 0.5,
            ..Default::default()
        });
        gb.fit(&x, &y).unwrap();

        assert_eq!(gb.trees().len(), 5);
        assert_eq!(gb.col_indices_per_tree().len(), 5);
        for cols in gb.col_indices_per_tree() {
            assert_eq!(cols.len(), 2);
            assert!(cols.windows(2).all(|w| w[0] < w[1]));
        }
        assert!((gb.initial_prediction() - y.mean().unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_deterministic() {
        let (x, y) = fixture();
        let mut a = GradientBoostingRegressor::new(GradientBoostingConfig::default());
        let mut b = GradientBoostingRegressor::new(GradientBoostingConfig::default());
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_rejects_wrong_width() {
        let (x, y) = fixture();
        let mut gb = GradientBoostingRegressor::new(GradientBoostingConfig {
            n_estimators: 2,
            ..Default::default()
        });
        gb.fit(&x, &y).unwrap();
        assert!(gb.predict(&array![[1.0]]).is_err());
    }
}
