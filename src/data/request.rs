//! Analysis requests and their cache identity

use crate::config::EngineConfig;
use crate::error::{AttributionError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Parameters of one attribution run.
///
/// Constructed through [`AnalysisRequestBuilder`] and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    target: String,
    analysis_type: Option<String>,
    min_rows: usize,
    max_rows: usize,
    batch_size: usize,
    max_workers: usize,
    memory_efficient: bool,
    random_state: u64,
}

impl AnalysisRequest {
    /// Start a request for `target` with defaults taken from `config`
    pub fn builder(target: impl Into<String>, config: &EngineConfig) -> AnalysisRequestBuilder {
        AnalysisRequestBuilder {
            target: target.into(),
            analysis_type: None,
            min_rows: config.features.min_rows,
            max_rows: config.attribution.max_samples,
            batch_size: config.attribution.batch_size,
            max_workers: config.attribution.max_workers,
            memory_efficient: config.attribution.memory_efficient_mode,
            random_state: config.attribution.random_state,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn analysis_type(&self) -> Option<&str> {
        self.analysis_type.as_deref()
    }

    pub fn min_rows(&self) -> usize {
        self.min_rows
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn memory_efficient(&self) -> bool {
        self.memory_efficient
    }

    pub fn random_state(&self) -> u64 {
        self.random_state
    }

    /// Request parameters as a sorted map
    pub fn sorted_params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("analysis_type", self.analysis_type.clone().unwrap_or_default());
        params.insert("batch_size", self.batch_size.to_string());
        params.insert("max_rows", self.max_rows.to_string());
        params.insert("max_workers", self.max_workers.to_string());
        params.insert("memory_efficient", self.memory_efficient.to_string());
        params.insert("min_rows", self.min_rows.to_string());
        params.insert("random_state", self.random_state.to_string());
        params.insert("target", self.target.clone());
        params
    }

    /// SHA-256 over the sorted parameter map
    pub fn params_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in self.sorted_params() {
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
            hasher.update([b';']);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Validating builder for [`AnalysisRequest`]
#[derive(Debug, Clone)]
pub struct AnalysisRequestBuilder {
    target: String,
    analysis_type: Option<String>,
    min_rows: usize,
    max_rows: usize,
    batch_size: usize,
    max_workers: usize,
    memory_efficient: bool,
    random_state: u64,
}

impl AnalysisRequestBuilder {
    pub fn analysis_type(mut self, tag: impl Into<String>) -> Self {
        self.analysis_type = Some(tag.into());
        self
    }

    pub fn sampling_bounds(mut self, min_rows: usize, max_rows: usize) -> Self {
        self.min_rows = min_rows;
        self.max_rows = max_rows;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn memory_efficient(mut self, enabled: bool) -> Self {
        self.memory_efficient = enabled;
        self
    }

    pub fn random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn build(self) -> Result<AnalysisRequest> {
        if self.target.trim().is_empty() {
            return Err(AttributionError::invalid_parameter("target", "", "must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(AttributionError::invalid_parameter("batch_size", 0, "must be positive"));
        }
        if self.max_workers == 0 {
            return Err(AttributionError::invalid_parameter("max_workers", 0, "must be positive"));
        }
        if self.min_rows < 2 {
            return Err(AttributionError::invalid_parameter("min_rows", self.min_rows, "must be at least 2"));
        }
        if self.max_rows < self.min_rows {
            return Err(AttributionError::invalid_parameter(
                "max_rows",
                self.max_rows,
                format!("must be >= min_rows ({})", self.min_rows),
            ));
        }
        Ok(AnalysisRequest {
            target: self.target,
            analysis_type: self.analysis_type,
            min_rows: self.min_rows,
            max_rows: self.max_rows,
            batch_size: self.batch_size,
            max_workers: self.max_workers,
            memory_efficient: self.memory_efficient,
            random_state: self.random_state,
        })
    }
}
