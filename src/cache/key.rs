//! Content-addressed cache keys

use crate::data::{AnalysisRequest, Dataset};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const PART_LEN: usize = 32;

/// `<dataset hash[..32]>-<params hash[..32]>`.
///
/// The params half covers the request and the engine's result settings
/// fingerprint, so two analyses share a key only when data, request and
/// settings are all equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_analysis(dataset: &Dataset, request: &AnalysisRequest, config_fingerprint: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.params_hash().as_bytes());
        hasher.update([b'|']);
        hasher.update(config_fingerprint.as_bytes());
        Self::from_hashes(&dataset.content_hash(), &format!("{:x}", hasher.finalize()))
    }

    pub fn from_hashes(data_hash: &str, params_hash: &str) -> Self {
        let prefix = |h: &str| h.chars().take(PART_LEN).collect::<String>();
        CacheKey(format!("{}-{}", prefix(data_hash), prefix(params_hash)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn dataset(points: Vec<f64>) -> Dataset {
        let ids = (0..points.len()).map(|i| format!("team{}", i)).collect();
        let goals: Vec<f64> = points.iter().map(|p| p / 3.0).collect();
        Dataset::from_numeric(ids, vec![("goals", goals), ("points", points)]).unwrap()
    }

    #[test]
    fn test_key_shape() {
        let config = EngineConfig::default();
        let request = AnalysisRequest::builder("points", &config).build().unwrap();
        let fingerprint = config.fingerprint().unwrap();
        let key = CacheKey::for_analysis(&dataset(vec![3.0, 6.0, 9.0]), &request, &fingerprint);

        let (data, params) = key.as_str().split_once('-').unwrap();
        assert_eq!(data.len(), 32);
        assert_eq!(params.len(), 32);
    }

    #[test]
    fn test_equal_inputs_share_a_key() {
        let config = EngineConfig::default();
        let a = AnalysisRequest::builder("points", &config).batch_size(10).build().unwrap();
        let b = AnalysisRequest::builder("points", &config).batch_size(10).build().unwrap();
        let c = AnalysisRequest::builder("points", &config).batch_size(20).build().unwrap();

        let fp = config.fingerprint().unwrap();
        let data = dataset(vec![3.0, 6.0, 9.0]);
        assert_eq!(CacheKey::for_analysis(&data, &a, &fp), CacheKey::for_analysis(&data, &b, &fp));
        assert_ne!(CacheKey::for_analysis(&data, &a, &fp), CacheKey::for_analysis(&data, &c, &fp));
        assert_ne!(
            CacheKey::for_analysis(&data, &a, &fp),
            CacheKey::for_analysis(&dataset(vec![3.0, 6.0, 10.0]), &a, &fp)
        );
    }

    #[test]
    fn test_settings_fingerprint_splits_keys() {
        let config = EngineConfig::default();
        let request = AnalysisRequest::builder("points", &config).build().unwrap();
        let data = dataset(vec![3.0, 6.0, 9.0]);

        let forest_only = config.clone().with_candidates(vec![crate::training::ModelFamily::RandomForest]);
        let a = CacheKey::for_analysis(&data, &request, &config.fingerprint().unwrap());
        let b = CacheKey::for_analysis(&data, &request, &forest_only.fingerprint().unwrap());

        assert_ne!(a, b);
        // same data half, different params half
        assert_eq!(a.as_str().split_once('-').unwrap().0, b.as_str().split_once('-').unwrap().0);
    }
}
