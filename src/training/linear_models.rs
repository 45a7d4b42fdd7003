//! Ridge regression

use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Solve the symmetric positive-definite system `a · x = b` by Cholesky
/// decomposition. A non-positive pivot triggers one retry with a small
/// diagonal jitter.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }
    let jitter = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64;

    for ridge in [0.0, jitter.max(1e-12)] {
        if let Some(l) = cholesky_factor(a, ridge) {
            // forward: L · z = b
            let mut z = Array1::zeros(n);
            for i in 0..n {
                let sum: f64 = (0..i).map(|j| l[[i, j]] * z[j]).sum();
                z[i] = (b[i] - sum) / l[[i, i]];
            }
            // backward: Lᵀ · x = z
            let mut x = Array1::zeros(n);
            for i in (0..n).rev() {
                let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
                x[i] = (z[i] - sum) / l[[i, i]];
            }
            return Some(x);
        }
    }
    None
}

fn cholesky_factor(a: &Array2<f64>, ridge: f64) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] + ridge - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Ridge Regression (L2-regularized linear regression)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    coefficients: Option<Array1<f64>>,
    intercept: f64,
    /// L2 regularization strength
    pub alpha: f64,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            coefficients: None,
            intercept: 0.0,
            alpha: alpha.max(0.0),
        }
    }

    /// Fit on centred data so the intercept is not penalised
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(AttributionError::ModelFit("cannot fit ridge on zero rows".to_string()));
        }

        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| AttributionError::Computation("empty design matrix".to_string()))?;
        let y_mean = y.mean().unwrap_or(0.0);
        let x_c = x - &x_mean.view().insert_axis(Axis(0));
        let y_c = y - y_mean;

        let mut xtx = x_c.t().dot(&x_c);
        for i in 0..n_features {
            xtx[[i, i]] += self.alpha;
        }
        let xty = x_c.t().dot(&y_c);

        let coefficients = cholesky_solve(&xtx, &xty)
            .ok_or_else(|| AttributionError::ModelFit("singular ridge system".to_string()))?;
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(AttributionError::ModelFit("non-finite ridge coefficients".to_string()));
        }

        self.intercept = y_mean - coefficients.dot(&x_mean);
        self.coefficients = Some(coefficients);
        Ok(self)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(AttributionError::ModelNotFitted)?;
        if x.ncols() != coefficients.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("{} features", coefficients.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.dot(coefficients) + self.intercept)
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}
