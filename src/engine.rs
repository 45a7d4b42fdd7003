//! Analysis orchestration
//!
//! [`AnalysisEngine::analyze`] consults the result cache, and on a miss runs
//! feature preparation, model selection and attribution, then writes the
//! result through every cache tier. Each call is tracked as one operation by
//! the engine's [`ResourceMonitor`].

use crate::cache::{CacheKey, CacheTier, MultiTierCache};
use crate::config::{Capabilities, EngineConfig};
use crate::data::{AnalysisRequest, Dataset};
use crate::error::Result;
use crate::explainability::{AttributionComputer, AttributionResult, ModelPerformance, ResultMetadata};
use crate::monitoring::{OperationTracker, ProcessingMetrics, ResourceMonitor};
use crate::preprocessing::FeatureSelector;
use crate::training::ModelSelector;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Operation name recorded for every `analyze` call
pub const ANALYZE_OPERATION: &str = "analyze";

/// Result of one `analyze` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub result: AttributionResult,
    pub metrics: ProcessingMetrics,
    pub cache_key: String,
    /// Tier that served the result, `None` when it was computed
    pub served_from: Option<CacheTier>,
}

impl AnalysisOutcome {
    pub fn cache_hit(&self) -> bool {
        self.served_from.is_some()
    }
}

/// Entry point of the attribution pipeline
pub struct AnalysisEngine {
    config: EngineConfig,
    /// Hash of the result-affecting settings, folded into every cache key
    fingerprint: String,
    capabilities: Capabilities,
    cache: Arc<MultiTierCache>,
    monitor: ResourceMonitor,
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("capabilities", &self.capabilities)
            .field("cache_tiers", &self.cache.tiers())
            .finish_non_exhaustive()
    }
}

impl AnalysisEngine {
    /// Validate `config`, resolve capabilities and build the cache it
    /// describes
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let capabilities = Capabilities::resolve(&config);
        let cache = Arc::new(MultiTierCache::from_config(&config, &capabilities));
        Self::assemble(config, capabilities, cache)
    }

    /// Use an existing cache, e.g. one shared between engines
    pub fn with_cache(config: EngineConfig, capabilities: Capabilities, cache: Arc<MultiTierCache>) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, capabilities, cache)
    }

    fn assemble(config: EngineConfig, capabilities: Capabilities, cache: Arc<MultiTierCache>) -> Result<Self> {
        let fingerprint = config.fingerprint()?;
        let monitor = ResourceMonitor::new(&config.monitor);
        info!(
            tiers = ?cache.tiers(),
            workers = capabilities.worker_threads,
            "Analysis engine ready"
        );
        Ok(Self {
            config,
            fingerprint,
            capabilities,
            cache,
            monitor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Hash of the settings that change results; see [`EngineConfig::fingerprint`]
    pub fn config_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn cache(&self) -> &Arc<MultiTierCache> {
        &self.cache
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    /// Attributions of every entity of `dataset` for `request`.
    ///
    /// Equal datasets and equal requests are served from the cache. Errors
    /// are never cached.
    pub fn analyze(&self, dataset: &Dataset, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        let tracker = self.monitor.start(ANALYZE_OPERATION);
        let key = CacheKey::for_analysis(dataset, request, &self.fingerprint);
        let namespace = self.config.cache.namespace.as_str();

        if let Some((result, tier)) = self.cache.get_with_tier::<AttributionResult>(namespace, key.as_str()) {
            tracker.record_cache_hit();
            tracker.record_rows(result.n_entities());
            let metrics = self.monitor.complete(tracker);
            info!(key = %key, tier = %tier, "Served attribution from cache");
            return Ok(AnalysisOutcome {
                result,
                metrics,
                cache_key: key.to_string(),
                served_from: Some(tier),
            });
        }
        if self.cache.is_enabled() {
            tracker.record_cache_miss();
        }

        match self.compute(dataset, request, &tracker) {
            Ok(result) => {
                if !self.cache.set(namespace, key.as_str(), &result, None) && self.cache.is_enabled() {
                    warn!(key = %key, "Result not cached in any tier");
                }
                let metrics = self.monitor.complete(tracker);
                Ok(AnalysisOutcome {
                    result,
                    metrics,
                    cache_key: key.to_string(),
                    served_from: None,
                })
            }
            Err(e) => {
                tracker.record_error();
                let metrics = self.monitor.complete(tracker);
                warn!(error = %e, duration_ms = metrics.duration_ms, "Analysis failed");
                Err(e)
            }
        }
    }

    fn compute(
        &self,
        dataset: &Dataset,
        request: &AnalysisRequest,
        tracker: &OperationTracker<'_>,
    ) -> Result<AttributionResult> {
        let start = Instant::now();

        let prepared = FeatureSelector::new(self.config.features.clone())
            .with_min_rows(request.min_rows())
            .prepare(dataset, request.target())?;
        tracker.sample_memory();

        let selected = ModelSelector::new(self.config.models.clone()).select(&prepared.features, &prepared.target)?;
        tracker.sample_memory();

        let computer = AttributionComputer::new(self.config.attribution.clone())
            .with_request(request)
            .with_max_workers(request.max_workers().min(self.capabilities.worker_threads))
            .with_reclaimer(self.cache.clone());
        let output = computer.compute(&selected, &prepared, tracker)?;

        let model_performance = ModelPerformance {
            family: selected.family,
            score: selected.score,
            error: selected.error,
            candidate_scores: selected
                .candidate_scores
                .iter()
                .map(|(family, candidate)| (*family, candidate.score))
                .collect(),
        };
        let metadata = ResultMetadata {
            feature_names: prepared.feature_names.clone(),
            target: request.target().to_string(),
            n_entities: output.entity_ids.len(),
            entity_ids: output.entity_ids,
            analysis_type: request.analysis_type().map(str::to_string),
            sampled_from: output.sampled_from,
            failed_batches: output.failed_batches,
            computed_at: Utc::now(),
        };
        let result = AttributionResult::new(
            output.attributions,
            output.base_value,
            output.predictions,
            model_performance,
            metadata,
        )?;

        debug!(
            entities = result.n_entities(),
            features = result.metadata.feature_names.len(),
            family = %selected.family,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Attribution computed"
        );
        Ok(result)
    }

    /// Drop the cached result of `request` over `dataset` from every tier
    pub fn invalidate(&self, dataset: &Dataset, request: &AnalysisRequest) {
        let key = CacheKey::for_analysis(dataset, request, &self.fingerprint);
        self.cache.delete(&self.config.cache.namespace, key.as_str());
    }

    /// Best-effort clear of the engine's namespace in the shared and disk
    /// tiers
    pub fn clear_cache(&self) -> usize {
        self.cache.clear_namespace(&self.config.cache.namespace)
    }
}
