//! Tabular input for attribution runs

use crate::error::{AttributionError, Result};
use polars::prelude::{CsvReadOptions, DataFrame, DataType, SerReader};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

/// Kind of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Column values; `None` marks a missing cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Numeric(_) => ColumnKind::Numeric,
            ColumnData::Categorical(_) => ColumnKind::Categorical,
        }
    }

    pub fn null_count(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.iter().filter(|x| x.map_or(true, |f| f.is_nan())).count(),
            ColumnData::Categorical(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Categorical(values),
        }
    }
}

/// Ordered table of entities (players or teams) by named columns.
///
/// Rows are keyed by a stable entity identifier. A dataset is never
/// mutated after construction; its identity for caching purposes is
/// [`Dataset::content_hash`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    entity_ids: Vec<String>,
    columns: Vec<Column>,
}

impl Dataset {
    /// Build a dataset, checking that every column matches the entity count
    /// and that names are unique.
    pub fn new(entity_ids: Vec<String>, columns: Vec<Column>) -> Result<Self> {
        let n_rows = entity_ids.len();
        let mut seen = HashSet::new();
        for column in &columns {
            if column.data.len() != n_rows {
                return Err(AttributionError::ShapeError {
                    expected: format!("{} rows in column '{}'", n_rows, column.name),
                    actual: format!("{} rows", column.data.len()),
                });
            }
            if !seen.insert(column.name.as_str()) {
                return Err(AttributionError::Data(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { entity_ids, columns })
    }

    /// Build from fully-populated numeric columns
    pub fn from_numeric(entity_ids: Vec<String>, columns: Vec<(&str, Vec<f64>)>) -> Result<Self> {
        let columns = columns
            .into_iter()
            .map(|(name, values)| Column::numeric(name, values.into_iter().map(Some).collect()))
            .collect();
        Self::new(entity_ids, columns)
    }

    /// Convert a polars frame.
    ///
    /// Numeric dtypes become numeric columns, everything else is read as
    /// strings. When `entity_column` is given it supplies the row ids and is
    /// not kept as a feature; otherwise rows are numbered.
    pub fn from_dataframe(df: &DataFrame, entity_column: Option<&str>) -> Result<Self> {
        let n_rows = df.height();
        let mut entity_ids: Option<Vec<String>> = None;
        let mut columns = Vec::with_capacity(df.width());

        for column in df.get_columns() {
            let name = column.name().to_string();
            let series = column.as_materialized_series();

            if entity_column == Some(name.as_str()) {
                let as_str = series.cast(&DataType::String)?;
                let ids = as_str
                    .str()?
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| v.map(|s| s.to_string()).unwrap_or_else(|| format!("row_{}", i)))
                    .collect();
                entity_ids = Some(ids);
                continue;
            }

            if is_numeric_dtype(series.dtype()) {
                let as_f64 = series.cast(&DataType::Float64)?;
                let values = as_f64.f64()?.into_iter().collect();
                columns.push(Column::numeric(name, values));
            } else {
                let as_str = series.cast(&DataType::String)?;
                let values = as_str
                    .str()?
                    .into_iter()
                    .map(|v| v.map(|s| s.to_string()))
                    .collect();
                columns.push(Column::categorical(name, values));
            }
        }

        if let Some(col) = entity_column {
            if entity_ids.is_none() {
                return Err(AttributionError::FeatureNotFound(col.to_string()));
            }
        }
        let entity_ids =
            entity_ids.unwrap_or_else(|| (0..n_rows).map(|i| format!("row_{}", i)).collect());
        Self::new(entity_ids, columns)
    }

    /// Load a CSV file with a header row
    pub fn from_csv(path: impl AsRef<Path>, entity_column: Option<&str>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(100))
            .into_reader_with_file_handle(file)
            .finish()?;
        Self::from_dataframe(&df, entity_column)
    }

    pub fn n_rows(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// SHA-256 over entity ids, column names, kinds and values.
    ///
    /// Floats hash by bit pattern with NaN canonicalised to missing, so the
    /// hash only changes when content does.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.entity_ids.len() as u64).to_le_bytes());
        for id in &self.entity_ids {
            hash_str(&mut hasher, id);
        }
        hasher.update((self.columns.len() as u64).to_le_bytes());
        for column in &self.columns {
            hash_str(&mut hasher, &column.name);
            match &column.data {
                ColumnData::Numeric(values) => {
                    hasher.update([0u8]);
                    for v in values {
                        match v {
                            Some(f) if !f.is_nan() => {
                                hasher.update([1u8]);
                                // -0.0 and 0.0 are the same value
                                let canonical = if *f == 0.0 { 0.0f64 } else { *f };
                                hasher.update(canonical.to_bits().to_le_bytes());
                            }
                            _ => hasher.update([0u8]),
                        }
                    }
                }
                ColumnData::Categorical(values) => {
                    hasher.update([1u8]);
                    for v in values {
                        match v {
                            Some(s) => {
                                hasher.update([1u8]);
                                hash_str(&mut hasher, s);
                            }
                            None => hasher.update([0u8]),
                        }
                    }
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Boolean
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::df;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("team_{}", i)).collect()
    }

    #[test]
    fn test_rejects_ragged_columns() {
        let result = Dataset::from_numeric(ids(3), vec![("a", vec![1.0, 2.0])]);
        assert!(matches!(result, Err(AttributionError::ShapeError { .. })));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let result = Dataset::from_numeric(ids(2), vec![("a", vec![1.0, 2.0]), ("a", vec![3.0, 4.0])]);
        assert!(matches!(result, Err(AttributionError::Data(_))));
    }

    #[test]
    fn test_content_hash_is_stable_and_sensitive() {
        let a = Dataset::from_numeric(ids(3), vec![("x", vec![1.0, 2.0, 3.0])]).unwrap();
        let b = Dataset::from_numeric(ids(3), vec![("x", vec![1.0, 2.0, 3.0])]).unwrap();
        let c = Dataset::from_numeric(ids(3), vec![("x", vec![1.0, 2.0, 3.5])]).unwrap();
        let d = Dataset::from_numeric(ids(3), vec![("y", vec![1.0, 2.0, 3.0])]).unwrap();

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_ne!(a.content_hash(), d.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_hash_treats_nan_as_missing() {
        let a = Dataset::new(ids(2), vec![Column::numeric("x", vec![Some(f64::NAN), Some(1.0)])]).unwrap();
        let b = Dataset::new(ids(2), vec![Column::numeric("x", vec![None, Some(1.0)])]).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_from_dataframe() {
        let df = df!(
            "team" => &["a", "b", "c"],
            "goals" => &[3i64, 1, 2],
            "venue" => &["home", "away", "home"]
        )
        .unwrap();

        let ds = Dataset::from_dataframe(&df, Some("team")).unwrap();
        assert_eq!(ds.n_rows(), 3);
        assert_eq!(ds.entity_ids(), &["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(ds.column_names(), vec!["goals", "venue"]);
        assert_eq!(ds.column("goals").unwrap().data.kind(), ColumnKind::Numeric);
        assert_eq!(ds.column("venue").unwrap().data.kind(), ColumnKind::Categorical);
    }

    #[test]
    fn test_from_dataframe_missing_entity_column() {
        let df = df!("goals" => &[1.0, 2.0]).unwrap();
        let result = Dataset::from_dataframe(&df, Some("team"));
        assert!(matches!(result, Err(AttributionError::FeatureNotFound(_))));
    }

    #[test]
    fn test_from_csv() {
        use std::io::Write;
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "player,minutes,points").unwrap();
        writeln!(file, "p1,30,12").unwrap();
        writeln!(file, "p2,25,").unwrap();
        file.flush().unwrap();

        let ds = Dataset::from_csv(file.path(), Some("player")).unwrap();
        assert_eq!(ds.n_rows(), 2);
        assert_eq!(ds.column("points").unwrap().data.null_count(), 1);
    }
}
