//! Engine configuration
//!
//! All tunables for feature preparation, model selection, attribution,
//! caching and monitoring. Every group has sensible defaults and can be
//! loaded from JSON.

use crate::cache::RedisStore;
use crate::error::{AttributionError, Result};
use crate::preprocessing::{ImputeStrategy, ScoreFunction};
use crate::training::ModelFamily;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Longest accepted cache time-to-live (ten years)
pub const MAX_CACHE_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// How many features survive univariate selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TopKRepr", into = "TopKRepr")]
pub enum FeatureTopK {
    /// Keep every feature
    All,
    /// Keep the k best-scoring features
    K(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TopKRepr {
    Count(usize),
    Keyword(String),
}

impl TryFrom<TopKRepr> for FeatureTopK {
    type Error = String;

    fn try_from(repr: TopKRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            TopKRepr::Count(0) => Err("feature_selection_top_k must be positive".to_string()),
            TopKRepr::Count(k) => Ok(FeatureTopK::K(k)),
            TopKRepr::Keyword(s) if s.eq_ignore_ascii_case("all") => Ok(FeatureTopK::All),
            TopKRepr::Keyword(s) => Err(format!("unrecognized feature_selection_top_k: {}", s)),
        }
    }
}

impl From<FeatureTopK> for TopKRepr {
    fn from(top_k: FeatureTopK) -> Self {
        match top_k {
            FeatureTopK::All => TopKRepr::Keyword("all".to_string()),
            FeatureTopK::K(k) => TopKRepr::Count(k),
        }
    }
}

/// Feature cleaning and selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Minimum usable rows after cleaning
    pub min_rows: usize,
    /// Imputation for missing numeric values
    pub numeric_impute: ImputeStrategy,
    /// Category substituted for missing categorical values
    pub categorical_sentinel: String,
    /// Feature count above which univariate selection kicks in
    pub feature_selection_threshold: usize,
    /// Number of features kept by univariate selection
    pub feature_selection_top_k: FeatureTopK,
    /// Univariate score used for ranking
    pub score_function: ScoreFunction,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_rows: 10,
            numeric_impute: ImputeStrategy::Median,
            categorical_sentinel: "__missing__".to_string(),
            feature_selection_threshold: 20,
            feature_selection_top_k: FeatureTopK::All,
            score_function: ScoreFunction::FStatistic,
        }
    }
}

/// Candidate models and cross-validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSelectionConfig {
    /// Families trained under cross-validation
    pub candidates: Vec<ModelFamily>,
    /// Family used on ties or when a candidate fails
    pub default_family: ModelFamily,
    /// Number of CV folds
    pub cv_folds: usize,
    /// Seed for fold shuffling and model randomness
    pub random_state: u64,
    /// Trees per ensemble
    pub n_estimators: usize,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Boosting shrinkage
    pub learning_rate: f64,
    /// Ridge L2 penalty
    pub ridge_alpha: f64,
}

impl Default for ModelSelectionConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                ModelFamily::GradientBoosting,
                ModelFamily::RandomForest,
                ModelFamily::Ridge,
            ],
            default_family: ModelFamily::GradientBoosting,
            cv_folds: 5,
            random_state: 42,
            n_estimators: 50,
            max_depth: 4,
            learning_rate: 0.1,
            ridge_alpha: 1.0,
        }
    }
}

/// Attribution batching and execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Rows per batch
    pub batch_size: usize,
    /// Rows per sub-batch in memory-efficient mode
    pub sub_batch_size: usize,
    /// Worker threads for batch computation (1 = sequential)
    pub max_workers: usize,
    /// Row cap before uniform subsampling
    pub max_samples: usize,
    /// Split batches into sequential sub-batches
    pub memory_efficient_mode: bool,
    /// System memory usage (%) at which a reclaim pass runs
    pub memory_threshold_pct: f64,
    /// Permutations per background row for the sampling explainer
    pub n_permutations: usize,
    /// Background rows for the sampling explainer
    pub background_size: usize,
    /// Seed for subsampling and the sampling explainer
    pub random_state: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            sub_batch_size: 50,
            max_workers: rayon::current_num_threads(),
            max_samples: 5000,
            memory_efficient_mode: false,
            memory_threshold_pct: 85.0,
            n_permutations: 8,
            background_size: 32,
            random_state: 42,
        }
    }
}

/// Multi-tier cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub cache_enabled: bool,
    /// Default L2 time-to-live
    pub cache_ttl_seconds: u64,
    /// L1 entry bound
    pub l1_capacity: usize,
    /// L3 root directory (None disables the disk tier)
    pub cache_root: Option<PathBuf>,
    /// Shared store URL; None selects the in-process simulated store
    pub redis_url: Option<String>,
    /// Connect/read/write timeout for the shared store
    pub redis_timeout_ms: u64,
    /// Gzip payloads before storing
    pub compression: bool,
    /// Namespace for attribution results
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_seconds: 3600,
            l1_capacity: 128,
            cache_root: Some(std::env::temp_dir().join("sports-attribution-cache")),
            redis_url: None,
            redis_timeout_ms: 500,
            compression: true,
            namespace: "attribution".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }
}

/// Resource monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Completed operations kept in history
    pub history_capacity: usize,
    /// Minimum interval between process memory probes
    pub memory_refresh_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            memory_refresh_ms: 50,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub models: ModelSelectionConfig,
    pub attribution: AttributionConfig,
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; absent fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AttributionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.attribution.batch_size = batch_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.attribution.max_workers = max_workers;
        self
    }

    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.attribution.max_samples = max_samples;
        self
    }

    pub fn with_memory_efficient_mode(mut self, enabled: bool) -> Self {
        self.attribution.memory_efficient_mode = enabled;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache.cache_enabled = enabled;
        self
    }

    pub fn with_cache_ttl_seconds(mut self, ttl: u64) -> Self {
        self.cache.cache_ttl_seconds = ttl;
        self
    }

    pub fn with_cache_root(mut self, root: Option<PathBuf>) -> Self {
        self.cache.cache_root = root;
        self
    }

    pub fn with_feature_selection_top_k(mut self, top_k: FeatureTopK) -> Self {
        self.features.feature_selection_top_k = top_k;
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<ModelFamily>) -> Self {
        self.models.candidates = candidates;
        self
    }

    /// SHA-256 over every setting that can change an analysis result.
    ///
    /// Request-level overrides, worker and sub-batch sizing, the memory
    /// threshold and the cache and monitor groups do not enter it.
    pub fn fingerprint(&self) -> Result<String> {
        let settings = ResultSettings {
            features: &self.features,
            models: &self.models,
            n_permutations: self.attribution.n_permutations,
            background_size: self.attribution.background_size,
        };
        let bytes = serde_json::to_vec(&settings)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let a = &self.attribution;
        if a.batch_size == 0 {
            return Err(AttributionError::invalid_parameter("batch_size", a.batch_size, "must be positive"));
        }
        if a.sub_batch_size == 0 {
            return Err(AttributionError::invalid_parameter("sub_batch_size", a.sub_batch_size, "must be positive"));
        }
        if a.max_workers == 0 {
            return Err(AttributionError::invalid_parameter("max_workers", a.max_workers, "must be positive"));
        }
        if a.max_samples == 0 {
            return Err(AttributionError::invalid_parameter("max_samples", a.max_samples, "must be positive"));
        }
        if !(0.0..=100.0).contains(&a.memory_threshold_pct) {
            return Err(AttributionError::invalid_parameter(
                "memory_threshold_pct",
                a.memory_threshold_pct,
                "must be within 0..=100",
            ));
        }
        if a.n_permutations == 0 || a.background_size == 0 {
            return Err(AttributionError::Config(
                "n_permutations and background_size must be positive".to_string(),
            ));
        }
        if self.models.candidates.is_empty() {
            return Err(AttributionError::Config("no candidate model families".to_string()));
        }
        if self.models.cv_folds < 2 {
            return Err(AttributionError::invalid_parameter("cv_folds", self.models.cv_folds, "must be at least 2"));
        }
        if self.features.min_rows < 2 {
            return Err(AttributionError::invalid_parameter("min_rows", self.features.min_rows, "must be at least 2"));
        }
        if self.cache.cache_ttl_seconds > MAX_CACHE_TTL_SECONDS {
            return Err(AttributionError::invalid_parameter(
                "cache_ttl_seconds",
                self.cache.cache_ttl_seconds,
                "must be at most ten years",
            ));
        }
        if self.cache.l1_capacity == 0 {
            return Err(AttributionError::invalid_parameter("l1_capacity", self.cache.l1_capacity, "must be positive"));
        }
        if self.monitor.history_capacity == 0 {
            return Err(AttributionError::invalid_parameter(
                "history_capacity",
                self.monitor.history_capacity,
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ResultSettings<'a> {
    features: &'a FeatureConfig,
    models: &'a ModelSelectionConfig,
    n_permutations: usize,
    background_size: usize,
}

/// Which shared-store backend is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharedStoreBackend {
    Redis,
    Simulated,
    Disabled,
}

/// Optional capabilities, resolved once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub shared_store: SharedStoreBackend,
    pub disk_store: bool,
    pub worker_threads: usize,
}

impl Capabilities {
    /// Probe the environment described by `config`.
    ///
    /// An unreachable shared store downgrades to the simulated backend.
    pub fn resolve(config: &EngineConfig) -> Self {
        let shared_store = if !config.cache.cache_enabled {
            SharedStoreBackend::Disabled
        } else {
            match &config.cache.redis_url {
                Some(url) => match RedisStore::connect(url, config.cache.redis_timeout()) {
                    Ok(_) => SharedStoreBackend::Redis,
                    Err(e) => {
                        warn!(error = %e, "Shared store unreachable, using simulated store");
                        SharedStoreBackend::Simulated
                    }
                },
                None => SharedStoreBackend::Simulated,
            }
        };

        let worker_threads = config
            .attribution
            .max_workers
            .min(rayon::current_num_threads().max(1))
            .max(1);

        let caps = Self {
            shared_store,
            disk_store: config.cache.cache_enabled && config.cache.cache_root.is_some(),
            worker_threads,
        };
        info!(
            shared_store = ?caps.shared_store,
            disk_store = caps.disk_store,
            worker_threads = caps.worker_threads,
            "Resolved capabilities"
        );
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.attribution.batch_size, 100);
        assert_eq!(config.features.feature_selection_top_k, FeatureTopK::All);
    }

    #[test]
    fn test_json_overrides() {
        let json = r#"{
            "attribution": { "batch_size": 10, "max_workers": 2, "memory_efficient_mode": true },
            "cache": { "cache_ttl_seconds": 60, "cache_enabled": false },
            "features": { "feature_selection_top_k": 8 }
        }"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.attribution.batch_size, 10);
        assert_eq!(config.attribution.max_workers, 2);
        assert!(config.attribution.memory_efficient_mode);
        assert_eq!(config.cache.cache_ttl_seconds, 60);
        assert!(!config.cache.cache_enabled);
        assert_eq!(config.features.feature_selection_top_k, FeatureTopK::K(8));
        // untouched groups keep defaults
        assert_eq!(config.models.cv_folds, 5);
    }

    #[test]
    fn test_top_k_keyword() {
        let json = r#"{ "features": { "feature_selection_top_k": "all" } }"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.features.feature_selection_top_k, FeatureTopK::All);

        let bad = r#"{ "features": { "feature_selection_top_k": "most" } }"#;
        assert!(EngineConfig::from_json_str(bad).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = EngineConfig::default().with_batch_size(0);
        assert!(matches!(
            config.validate(),
            Err(AttributionError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_validate_bounds_cache_ttl() {
        let config = EngineConfig::default().with_cache_ttl_seconds(u64::MAX);
        assert!(matches!(
            config.validate(),
            Err(AttributionError::InvalidParameter { ref name, .. }) if name == "cache_ttl_seconds"
        ));
        assert!(EngineConfig::from_json_str(r#"{ "cache": { "cache_ttl_seconds": 18446744073709551615 } }"#).is_err());
        assert!(EngineConfig::default()
            .with_cache_ttl_seconds(MAX_CACHE_TTL_SECONDS)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_fingerprint_tracks_result_settings() {
        let base = EngineConfig::default();
        let same = EngineConfig::default()
            .with_max_workers(1)
            .with_cache_enabled(false)
            .with_cache_ttl_seconds(5);
        assert_eq!(base.fingerprint().unwrap(), same.fingerprint().unwrap());

        let ridge = EngineConfig::default().with_candidates(vec![ModelFamily::Ridge]);
        assert_ne!(base.fingerprint().unwrap(), ridge.fingerprint().unwrap());

        let mut deeper = EngineConfig::default();
        deeper.models.max_depth += 1;
        assert_ne!(base.fingerprint().unwrap(), deeper.fingerprint().unwrap());

        let mut zero_fill = EngineConfig::default();
        zero_fill.features.numeric_impute = ImputeStrategy::Zero;
        assert_ne!(base.fingerprint().unwrap(), zero_fill.fingerprint().unwrap());

        let mut more_permutations = EngineConfig::default();
        more_permutations.attribution.n_permutations += 1;
        assert_ne!(base.fingerprint().unwrap(), more_permutations.fingerprint().unwrap());
    }

    #[test]
    fn test_capabilities_without_redis() {
        let config = EngineConfig::default().with_max_workers(1);
        let caps = Capabilities::resolve(&config);
        assert_eq!(caps.shared_store, SharedStoreBackend::Simulated);
        assert_eq!(caps.worker_threads, 1);

        let disabled = Capabilities::resolve(&EngineConfig::default().with_cache_enabled(false));
        assert_eq!(disabled.shared_store, SharedStoreBackend::Disabled);
        assert!(!disabled.disk_store);
    }
}
