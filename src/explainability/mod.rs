//! Model explainability
//!
//! Per-entity Shapley attributions:
//! - Exact path-dependent TreeSHAP for tree ensembles
//! - Permutation sampling against a background set for other models
//! - Batched, optionally parallel computation with failure isolation
//! - Importance ranking and summary statistics over the result

mod computer;
mod result;
mod sampling;
mod tree_shap;

pub use computer::{AttributionComputer, AttributionOutput, BatchExplainer};
pub use result::{
    rank_importance, AttributionRecord, AttributionResult, EntityAttribution, FeatureImportance,
    ModelPerformance, ResultMetadata, ShapSummary,
};
pub use sampling::{draw_background, SamplingExplainer};
pub use tree_shap::TreeExplainer;
