//! Random forest regressor

use super::decision_tree::DecisionTree;
use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Random forest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestConfig {
    pub n_estimators: usize,
    /// `None` grows trees until leaves are pure or too small
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    /// Share of columns considered at each split, in (0, 1]
    pub feature_fraction: f64,
    /// Draw each tree's rows with replacement
    pub bootstrap: bool,
    pub random_state: u64,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            max_depth: None,
            min_samples_leaf: 1,
            feature_fraction: 1.0 / 3.0,
            bootstrap: true,
            random_state: 42,
        }
    }
}

/// Bagged ensemble of regression trees; predicts the tree average
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    config: RandomForestConfig,
    trees: Vec<DecisionTree>,
    /// Per-tree impurity importances, summed and normalised
    feature_importances: Vec<f64>,
    n_features: usize,
}

impl RandomForest {
    pub fn new(config: RandomForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            feature_importances: Vec::new(),
            n_features: 0,
        }
    }

    pub fn config(&self) -> &RandomForestConfig {
        &self.config
    }

    fn split_width(&self, n_features: usize) -> usize {
        let fraction = self.config.feature_fraction.clamp(f64::MIN_POSITIVE, 1.0);
        ((n_features as f64 * fraction).ceil() as usize).clamp(1, n_features.max(1))
    }

    /// Grow every tree in parallel. Tree `i` draws its rows and split
    /// columns from `random_state + i`, so the fit does not depend on
    /// scheduling.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples != y.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("{} targets", n_samples),
                actual: format!("{} targets", y.len()),
            });
        }
        if n_samples == 0 || self.config.n_estimators == 0 {
            return Err(AttributionError::ModelFit(format!(
                "forest needs rows and trees (rows={}, trees={})",
                n_samples, self.config.n_estimators
            )));
        }

        let width = self.split_width(n_features);
        let config = &self.config;
        let trees = (0..config.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(config.random_state.wrapping_add(i as u64));
                let mut tree = DecisionTree::new()
                    .with_min_samples_leaf(config.min_samples_leaf)
                    .with_max_features(width)
                    .with_random_state(rng.gen());
                if let Some(depth) = config.max_depth {
                    tree = tree.with_max_depth(depth);
                }

                if config.bootstrap {
                    let rows: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                    let y_rows: Array1<f64> = rows.iter().map(|&r| y[r]).collect();
                    tree.fit(&x.select(Axis(0), &rows), &y_rows)?;
                } else {
                    tree.fit(x, y)?;
                }
                Ok(tree)
            })
            .collect::<Result<Vec<DecisionTree>>>()?;

        let mut importances = vec![0.0; n_features];
        for tree_importance in trees.iter().filter_map(DecisionTree::feature_importances) {
            for (total, v) in importances.iter_mut().zip(tree_importance.iter()) {
                *total += v;
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        self.trees = trees;
        self.feature_importances = importances;
        self.n_features = n_features;
        Ok(())
    }

    /// Mean prediction over all trees
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(AttributionError::ModelNotFitted);
        }
        let per_tree = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<Vec<Array1<f64>>>>()?;
        // summed in tree order so repeated calls agree bit for bit
        let sum = per_tree.iter().fold(Array1::zeros(x.nrows()), |acc, p| acc + p);
        Ok(sum / self.trees.len() as f64)
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Empty before `fit`
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn forest(n_estimators: usize, random_state: u64) -> RandomForest {
        RandomForest::new(RandomForestConfig {
            n_estimators,
            random_state,
            ..RandomForestConfig::default()
        })
    }

    #[test]
    fn test_fits_a_line() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0];

        let mut rf = forest(10, 42);
        rf.fit(&x, &y).unwrap();
        let predictions = rf.predict(&x).unwrap();
        let mse = (&predictions - &y).mapv(|d| d * d).mean().unwrap();

        assert!(mse < 2.0, "mse {}", mse);
        assert_eq!(rf.trees().len(), 10);
        assert_eq!(rf.n_features(), 1);
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let x = array![[1.0, 0.5], [2.0, 0.1], [3.0, 0.9], [4.0, 0.3], [5.0, 0.7], [6.0, 0.2]];
        let y = array![1.0, 2.0, 3.5, 4.0, 5.5, 6.0];

        let mut a = forest(8, 3);
        let mut b = forest(8, 3);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_signal_found_with_narrow_splits() {
        // only the last column carries signal; one column per split
        let x = array![
            [0.0, 0.0, 1.0],
            [0.0, 0.0, 2.0],
            [0.0, 0.0, 3.0],
            [0.0, 0.0, 4.0],
            [0.0, 0.0, 5.0],
            [0.0, 0.0, 6.0]
        ];
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

        let mut rf = RandomForest::new(RandomForestConfig {
            n_estimators: 20,
            feature_fraction: 0.2,
            random_state: 1,
            ..RandomForestConfig::default()
        });
        rf.fit(&x, &y).unwrap();
        assert!(rf.feature_importances()[2] > 0.99);
    }

    #[test]
    fn test_without_bootstrap_trees_see_every_row() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];

        let mut rf = RandomForest::new(RandomForestConfig {
            n_estimators: 4,
            bootstrap: false,
            feature_fraction: 1.0,
            ..RandomForestConfig::default()
        });
        rf.fit(&x, &y).unwrap();
        assert!(rf.trees().iter().all(|t| t.root().map(|r| r.n_samples()) == Some(4)));
        assert_eq!(rf.predict(&x).unwrap(), y);
        assert!(rf.feature_importances()[0] >= rf.feature_importances()[1]);
    }

    #[test]
    fn test_unfitted_and_empty() {
        let rf = forest(3, 0);
        assert!(matches!(rf.predict(&array![[1.0]]), Err(AttributionError::ModelNotFitted)));

        let mut rf = forest(3, 0);
        let empty = Array2::<f64>::zeros((0, 2));
        assert!(matches!(rf.fit(&empty, &Array1::zeros(0)), Err(AttributionError::ModelFit(_))));
    }
}
