//! Sports attribution - contribution analysis for team and player statistics
//!
//! Explains a performance metric (points, wins, rating) of every entity in a
//! table through per-feature Shapley attributions, and caches results across
//! memory, a shared key-value store and disk.
//!
//! # Modules
//!
//! ## Pipeline
//! - [`data`] - Datasets and analysis requests
//! - [`preprocessing`] - Imputation, encoding, feature selection, scaling
//! - [`training`] - Candidate regressors and cross-validated model selection
//! - [`explainability`] - TreeSHAP, sampling explainer, batched computation
//! - [`engine`] - The cached end-to-end analysis
//!
//! ## Infrastructure
//! - [`cache`] - Multi-tier cache (LRU memory, shared store, disk)
//! - [`monitoring`] - Per-operation metrics and memory probing
//! - [`config`] - Engine configuration and resolved capabilities

// Core error handling
pub mod error;
pub mod config;

// Pipeline
pub mod data;
pub mod preprocessing;
pub mod training;
pub mod explainability;
pub mod engine;

// Infrastructure
pub mod cache;
pub mod monitoring;

pub use error::{AttributionError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{AttributionError, Result};

    // Configuration
    pub use crate::config::{
        AttributionConfig, CacheConfig, Capabilities, EngineConfig, FeatureConfig, FeatureTopK,
        ModelSelectionConfig, MonitorConfig, SharedStoreBackend,
    };

    // Data
    pub use crate::data::{AnalysisRequest, Column, Dataset};

    // Pipeline
    pub use crate::preprocessing::{FeatureSelector, PreparedData, StandardScaler};
    pub use crate::training::{ModelFamily, ModelSelector, SelectedModel};
    pub use crate::explainability::{AttributionComputer, AttributionRecord, AttributionResult, ShapSummary};
    pub use crate::engine::{AnalysisEngine, AnalysisOutcome};

    // Caching
    pub use crate::cache::{CacheKey, CacheStats, CacheTier, MultiTierCache, SharedStore};

    // Monitoring
    pub use crate::monitoring::{ProcessingMetrics, ResourceMonitor};
}
