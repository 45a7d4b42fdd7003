//! Univariate feature selection
//!
//! Scores each feature independently against the target and keeps the
//! top k. Two scores are available:
//! - F-statistic of a single-regressor linear fit
//! - Absolute Pearson correlation

use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Univariate score used to rank features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreFunction {
    /// r² / (1 - r²) · (n - 2)
    FStatistic,
    /// |r|
    Correlation,
}

/// Select the k best features by a univariate score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnivariateSelector {
    score_function: ScoreFunction,
    k: usize,
    selected_features: Option<Vec<usize>>,
    feature_scores: Option<Vec<f64>>,
    feature_names: Option<Vec<String>>,
}

impl UnivariateSelector {
    pub fn new(score_function: ScoreFunction, k: usize) -> Self {
        Self {
            score_function,
            k: k.max(1),
            selected_features: None,
            feature_scores: None,
            feature_names: None,
        }
    }

    /// Names used to break score ties
    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = Some(names);
        self
    }

    /// Score every feature and keep the top k.
    ///
    /// Ties are broken by feature name (or index when unnamed). The kept
    /// indices are returned in their original column order.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("{} target values", x.nrows()),
                actual: format!("{}", y.len()),
            });
        }
        if let Some(names) = &self.feature_names {
            if names.len() != x.ncols() {
                return Err(AttributionError::ShapeError {
                    expected: format!("{} feature names", x.ncols()),
                    actual: format!("{}", names.len()),
                });
            }
        }

        let scores: Vec<f64> = x
            .columns()
            .into_iter()
            .map(|col| self.score(col, y.view()))
            .collect();

        let mut ranked: Vec<usize> = (0..scores.len()).collect();
        ranked.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.tie_break(a, b))
        });
        let mut selected: Vec<usize> = ranked.into_iter().take(self.k.min(scores.len())).collect();
        selected.sort_unstable();

        self.feature_scores = Some(scores);
        self.selected_features = Some(selected);
        Ok(())
    }

    /// Keep only the selected columns
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let selected = self.selected_features.as_ref().ok_or(AttributionError::ModelNotFitted)?;
        let mut result = Array2::zeros((x.nrows(), selected.len()));
        for (new_idx, &old_idx) in selected.iter().enumerate() {
            result.column_mut(new_idx).assign(&x.column(old_idx));
        }
        Ok(result)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array2<f64>> {
        self.fit(x, y)?;
        self.transform(x)
    }

    pub fn selected_indices(&self) -> Option<&[usize]> {
        self.selected_features.as_deref()
    }

    pub fn scores(&self) -> Option<&[f64]> {
        self.feature_scores.as_deref()
    }

    pub fn selected_names(&self) -> Option<Vec<String>> {
        let indices = self.selected_features.as_ref()?;
        let names = self.feature_names.as_ref()?;
        Some(indices.iter().filter_map(|&i| names.get(i).cloned()).collect())
    }

    fn tie_break(&self, a: usize, b: usize) -> Ordering {
        match &self.feature_names {
            Some(names) => names[a].cmp(&names[b]),
            None => a.cmp(&b),
        }
    }

    fn score(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        let r = pearson_correlation(x, y);
        match self.score_function {
            ScoreFunction::Correlation => r.abs(),
            ScoreFunction::FStatistic => {
                let n = x.len() as f64;
                let r2 = r * r;
                if n <= 2.0 {
                    0.0
                } else if r2 >= 1.0 {
                    f64::MAX
                } else {
                    r2 / (1.0 - r2) * (n - 2.0)
                }
            }
        }
    }
}

/// Pearson correlation; 0 when either side is constant
pub fn pearson_correlation(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let n = x.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let x_mean = x.mean().unwrap_or(0.0);
    let y_mean = y.mean().unwrap_or(0.0);

    let x_std = (x.iter().map(|&v| (v - x_mean).powi(2)).sum::<f64>() / n).sqrt();
    let y_std = (y.iter().map(|&v| (v - y_mean).powi(2)).sum::<f64>() / n).sqrt();

    if x_std <= 0.0 || y_std <= 0.0 {
        return 0.0;
    }

    let covariance: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(&x, &y)| (x - x_mean) * (y - y_mean))
        .sum::<f64>()
        / n;

    (covariance / (x_std * y_std)).clamp(-1.0, 1.0)
}
