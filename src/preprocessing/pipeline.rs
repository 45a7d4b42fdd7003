//! Feature preparation pipeline

use super::encoder::OrdinalEncoder;
use super::feature_selection::UnivariateSelector;
use super::imputer::{FilledColumn, Imputer};
use crate::config::{FeatureConfig, FeatureTopK};
use crate::data::{Column, ColumnData, Dataset};
use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Model-ready matrix produced by [`FeatureSelector::prepare`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedData {
    /// Imputed and encoded, not scaled
    pub features: Array2<f64>,
    pub target: Array1<f64>,
    pub feature_names: Vec<String>,
    pub entity_ids: Vec<String>,
    /// Rows removed because the target was missing
    pub dropped_rows: usize,
    /// Univariate score of every candidate feature when selection ran
    pub selection_scores: Option<Vec<(String, f64)>>,
}

impl PreparedData {
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }
}

/// Cleans a [`Dataset`] into a numeric feature matrix for one target.
///
/// Rows without a target value are dropped, remaining gaps are imputed,
/// categoricals are ordinal-encoded, and wide tables are optionally
/// reduced to the k best features.
#[derive(Debug, Clone)]
pub struct FeatureSelector {
    config: FeatureConfig,
}

impl FeatureSelector {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn with_min_rows(mut self, min_rows: usize) -> Self {
        self.config.min_rows = min_rows;
        self
    }

    pub fn prepare(&self, dataset: &Dataset, target: &str) -> Result<PreparedData> {
        let start = Instant::now();

        let target_column = dataset
            .column(target)
            .ok_or_else(|| AttributionError::FeatureNotFound(target.to_string()))?;
        let target_values = match &target_column.data {
            ColumnData::Numeric(values) => values,
            ColumnData::Categorical(_) => {
                return Err(AttributionError::Data(format!(
                    "target column '{}' must be numeric",
                    target
                )))
            }
        };

        let keep: Vec<usize> = target_values
            .iter()
            .enumerate()
            .filter(|(_, v)| matches!(v, Some(f) if f.is_finite()))
            .map(|(i, _)| i)
            .collect();
        let dropped_rows = dataset.n_rows() - keep.len();
        if dropped_rows > 0 {
            info!(dropped = dropped_rows, target = %target, "Dropped rows with missing target");
        }
        if keep.len() < self.config.min_rows {
            return Err(AttributionError::InsufficientData {
                usable: keep.len(),
                required: self.config.min_rows,
            });
        }

        let target_vec: Array1<f64> = keep
            .iter()
            .map(|&i| target_values[i].unwrap_or_default())
            .collect();
        let entity_ids: Vec<String> = keep.iter().map(|&i| dataset.entity_ids()[i].clone()).collect();

        let feature_columns: Vec<Column> = dataset
            .columns()
            .iter()
            .filter(|c| c.name != target)
            .map(|c| take_rows(c, &keep))
            .collect();
        let feature_names: Vec<String> = feature_columns.iter().map(|c| c.name.clone()).collect();

        let column_refs: Vec<&Column> = feature_columns.iter().collect();
        let mut imputer = Imputer::new(self.config.numeric_impute, self.config.categorical_sentinel.clone());
        let filled = imputer.fit_transform(&column_refs)?;

        let mut encoder = OrdinalEncoder::new();
        let mut features = Array2::zeros((keep.len(), feature_columns.len()));
        for (j, (name, column)) in feature_names.iter().zip(filled).enumerate() {
            let values = match column {
                FilledColumn::Numeric(values) => values,
                FilledColumn::Categorical(values) => encoder.fit_transform(name, &values)?,
            };
            features.column_mut(j).assign(&Array1::from(values));
        }

        let (features, feature_names, selection_scores) =
            self.select(features, &target_vec, feature_names)?;

        debug!(
            rows = keep.len(),
            features = feature_names.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Prepared features"
        );

        Ok(PreparedData {
            features,
            target: target_vec,
            feature_names,
            entity_ids,
            dropped_rows,
            selection_scores,
        })
    }

    fn select(
        &self,
        features: Array2<f64>,
        target: &Array1<f64>,
        names: Vec<String>,
    ) -> Result<(Array2<f64>, Vec<String>, Option<Vec<(String, f64)>>)> {
        let k = match self.config.feature_selection_top_k {
            FeatureTopK::K(k) if names.len() > self.config.feature_selection_threshold => k,
            _ => return Ok((features, names, None)),
        };

        let mut selector =
            UnivariateSelector::new(self.config.score_function, k).with_feature_names(names.clone());
        let reduced = selector.fit_transform(&features, target)?;
        let kept = selector.selected_names().unwrap_or_default();
        let scores = selector
            .scores()
            .map(|s| names.iter().cloned().zip(s.iter().copied()).collect());

        info!(
            from = names.len(),
            to = kept.len(),
            score = ?self.config.score_function,
            "Univariate feature selection"
        );
        Ok((reduced, kept, scores))
    }
}

fn take_rows(column: &Column, rows: &[usize]) -> Column {
    match &column.data {
        ColumnData::Numeric(values) => {
            Column::numeric(column.name.clone(), rows.iter().map(|&i| values[i]).collect())
        }
        ColumnData::Categorical(values) => {
            Column::categorical(column.name.clone(), rows.iter().map(|&i| values[i].clone()).collect())
        }
    }
}
