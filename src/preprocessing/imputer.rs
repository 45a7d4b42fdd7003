//! Missing value imputation

use crate::data::{Column, ColumnData};
use crate::error::{AttributionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Strategy for imputing missing numeric values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImputeStrategy {
    /// Replace with the column median
    Median,
    /// Replace with the column mean
    Mean,
    /// Replace with 0.0
    Zero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ImputeValue {
    Numeric(f64),
    Category(String),
}

/// Column values after imputation
#[derive(Debug, Clone, PartialEq)]
pub enum FilledColumn {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

/// Imputer for handling missing values.
///
/// Numeric columns are filled per [`ImputeStrategy`]; categorical columns
/// get a fixed sentinel category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Imputer {
    strategy: ImputeStrategy,
    sentinel: String,
    fill_values: HashMap<String, ImputeValue>,
    is_fitted: bool,
}

impl Imputer {
    pub fn new(strategy: ImputeStrategy, sentinel: impl Into<String>) -> Self {
        Self {
            strategy,
            sentinel: sentinel.into(),
            fill_values: HashMap::new(),
            is_fitted: false,
        }
    }

    /// Learn a fill value for each column
    pub fn fit(&mut self, columns: &[&Column]) -> Result<&mut Self> {
        for column in columns {
            let fill = match &column.data {
                ColumnData::Numeric(values) => ImputeValue::Numeric(self.compute_fill_value(values)),
                ColumnData::Categorical(_) => ImputeValue::Category(self.sentinel.clone()),
            };
            self.fill_values.insert(column.name.clone(), fill);
        }
        self.is_fitted = true;
        Ok(self)
    }

    /// Fill the missing cells of a fitted column
    pub fn transform(&self, column: &Column) -> Result<FilledColumn> {
        if !self.is_fitted {
            return Err(AttributionError::ModelNotFitted);
        }
        let fill = self
            .fill_values
            .get(&column.name)
            .ok_or_else(|| AttributionError::FeatureNotFound(column.name.clone()))?;

        match (&column.data, fill) {
            (ColumnData::Numeric(values), ImputeValue::Numeric(v)) => Ok(FilledColumn::Numeric(
                values
                    .iter()
                    .map(|x| match x {
                        Some(f) if !f.is_nan() => *f,
                        _ => *v,
                    })
                    .collect(),
            )),
            (ColumnData::Categorical(values), ImputeValue::Category(s)) => Ok(FilledColumn::Categorical(
                values.iter().map(|x| x.clone().unwrap_or_else(|| s.clone())).collect(),
            )),
            _ => Err(AttributionError::Data(format!(
                "column '{}' changed kind since fit",
                column.name
            ))),
        }
    }

    pub fn fit_transform(&mut self, columns: &[&Column]) -> Result<Vec<FilledColumn>> {
        self.fit(columns)?;
        columns.iter().map(|c| self.transform(c)).collect()
    }

    /// Fill value learned for a numeric column
    pub fn numeric_fill(&self, name: &str) -> Option<f64> {
        match self.fill_values.get(name) {
            Some(ImputeValue::Numeric(v)) => Some(*v),
            _ => None,
        }
    }

    fn compute_fill_value(&self, values: &[Option<f64>]) -> f64 {
        let present: Vec<f64> = values
            .iter()
            .filter_map(|v| v.filter(|f| !f.is_nan()))
            .collect();
        if present.is_empty() {
            return 0.0;
        }
        match self.strategy {
            ImputeStrategy::Zero => 0.0,
            ImputeStrategy::Mean => present.iter().sum::<f64>() / present.len() as f64,
            ImputeStrategy::Median => median(present),
        }
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
