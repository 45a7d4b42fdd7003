//! K-fold cross-validation

use crate::error::{AttributionError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A single train/test split
#[derive(Debug, Clone)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// K-fold splitter
#[derive(Debug, Clone)]
pub struct CrossValidator {
    n_splits: usize,
    shuffle: bool,
    random_state: u64,
}

impl CrossValidator {
    pub fn k_fold(n_splits: usize, shuffle: bool) -> Self {
        Self {
            n_splits,
            shuffle,
            random_state: 42,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fold count actually used for `n_samples` rows
    pub fn effective_splits(&self, n_samples: usize) -> usize {
        self.n_splits.min(n_samples)
    }

    /// Generate train/test splits.
    ///
    /// The fold count is clamped to the number of rows; fewer than two rows
    /// cannot be cross-validated.
    pub fn split(&self, n_samples: usize) -> Result<Vec<CVSplit>> {
        let n_splits = self.effective_splits(n_samples);
        if n_splits < 2 {
            return Err(AttributionError::InsufficientData {
                usable: n_samples,
                required: 2,
            });
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
            indices.shuffle(&mut rng);
        }

        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;

        let mut splits = Vec::with_capacity(n_splits);
        let mut current = 0;
        for fold_idx in 0..n_splits {
            let fold_size = if fold_idx < remainder { base + 1 } else { base };
            let test_indices = indices[current..current + fold_size].to_vec();
            let train_indices = indices[..current]
                .iter()
                .chain(indices[current + fold_size..].iter())
                .copied()
                .collect();

            splits.push(CVSplit {
                train_indices,
                test_indices,
                fold_idx,
            });
            current += fold_size;
        }

        Ok(splits)
    }
}

/// Per-fold scores of one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVResults {
    /// R² per fold
    pub scores: Vec<f64>,
    /// RMSE per fold
    pub errors: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    pub mean_error: f64,
    pub n_folds: usize,
}

impl CVResults {
    pub fn from_folds(scores: Vec<f64>, errors: Vec<f64>) -> Self {
        let n_folds = scores.len();
        let mean = |v: &[f64]| if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 };
        let mean_score = mean(scores.as_slice());
        let mean_error = mean(errors.as_slice());
        let variance = if n_folds == 0 {
            0.0
        } else {
            scores.iter().map(|s| (s - mean_score).powi(2)).sum::<f64>() / n_folds as f64
        };

        Self {
            scores,
            errors,
            mean_score,
            std_score: variance.sqrt(),
            mean_error,
            n_folds,
        }
    }
}
