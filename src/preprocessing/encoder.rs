//! Ordinal encoding for categorical columns

use crate::error::{AttributionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Maps each category to its rank among the sorted distinct categories.
///
/// Sorting makes the codes independent of row order. Categories unseen at
/// fit time encode to -1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrdinalEncoder {
    mappings: HashMap<String, HashMap<String, usize>>,
    is_fitted: bool,
}

impl OrdinalEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, name: &str, values: &[String]) -> &mut Self {
        let distinct: BTreeSet<&str> = values.iter().map(String::as_str).collect();
        let mapping = distinct
            .into_iter()
            .enumerate()
            .map(|(code, category)| (category.to_string(), code))
            .collect();
        self.mappings.insert(name.to_string(), mapping);
        self.is_fitted = true;
        self
    }

    pub fn transform(&self, name: &str, values: &[String]) -> Result<Vec<f64>> {
        if !self.is_fitted {
            return Err(AttributionError::ModelNotFitted);
        }
        let mapping = self
            .mappings
            .get(name)
            .ok_or_else(|| AttributionError::FeatureNotFound(name.to_string()))?;
        Ok(values
            .iter()
            .map(|v| mapping.get(v).map_or(-1.0, |&code| code as f64))
            .collect())
    }

    pub fn fit_transform(&mut self, name: &str, values: &[String]) -> Result<Vec<f64>> {
        self.fit(name, values);
        self.transform(name, values)
    }

    /// Number of distinct categories seen for a column
    pub fn n_categories(&self, name: &str) -> Option<usize> {
        self.mappings.get(name).map(HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_codes_follow_sorted_categories() {
        let mut encoder = OrdinalEncoder::new();
        let codes = encoder
            .fit_transform("venue", &strings(&["home", "away", "neutral", "away"]))
            .unwrap();
        assert_eq!(codes, vec![1.0, 0.0, 2.0, 0.0]);
        assert_eq!(encoder.n_categories("venue"), Some(3));
    }

    #[test]
    fn test_codes_independent_of_row_order() {
        let mut a = OrdinalEncoder::new();
        let mut b = OrdinalEncoder::new();
        a.fit("c", &strings(&["x", "y", "z"]));
        b.fit("c", &strings(&["z", "x", "y"]));
        let lookup = strings(&["y"]);
        assert_eq!(a.transform("c", &lookup).unwrap(), b.transform("c", &lookup).unwrap());
    }

    #[test]
    fn test_unseen_category() {
        let mut encoder = OrdinalEncoder::new();
        encoder.fit("c", &strings(&["a"]));
        assert_eq!(encoder.transform("c", &strings(&["b"])).unwrap(), vec![-1.0]);
    }
}
