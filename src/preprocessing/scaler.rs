//! Feature standardisation

use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Standard scaling (z-score normalization): (x - mean) / std
///
/// Population standard deviation; zero-variance columns get scale 1 so
/// they pass through centred.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit the scaler to the rows of `x`
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        if x.nrows() == 0 {
            return Err(AttributionError::InsufficientData { usable: 0, required: 1 });
        }
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| AttributionError::Computation("empty matrix".to_string()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s });
        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(self)
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = self.params()?;
        if x.ncols() != mean.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("{} columns", mean.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok((x - mean) / scale)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn inverse_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = self.params()?;
        Ok(x * scale + mean)
    }

    pub fn is_fitted(&self) -> bool {
        self.mean.is_some()
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }

    fn params(&self) -> Result<(&Array1<f64>, &Array1<f64>)> {
        match (&self.mean, &self.scale) {
            (Some(mean), Some(scale)) => Ok((mean, scale)),
            _ => Err(AttributionError::ModelNotFitted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standard_scaling() {
        let x = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&x).unwrap();

        let col = scaled.column(0);
        assert!(col.mean().unwrap().abs() < 1e-12);
        let var = col.iter().map(|v| v * v).sum::<f64>() / 3.0;
        assert!((var - 1.0).abs() < 1e-12);
        // constant column is centred, not divided by zero
        assert!(scaled.column(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_transform_reuses_training_params() {
        let train = array![[0.0], [2.0]];
        let mut scaler = StandardScaler::new();
        scaler.fit(&train).unwrap();
        let out = scaler.transform(&array![[4.0]]).unwrap();
        assert!((out[[0, 0]] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_transform() {
        let x = array![[1.0, -2.0], [3.0, 4.0], [8.0, 0.5]];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&x).unwrap();
        let back = scaler.inverse_transform(&scaled).unwrap();
        for (a, b) in x.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_not_fitted() {
        let scaler = StandardScaler::new();
        assert!(matches!(
            scaler.transform(&array![[1.0]]),
            Err(AttributionError::ModelNotFitted)
        ));
    }
}
