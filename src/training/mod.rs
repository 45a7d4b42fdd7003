//! Model training
//!
//! Regression families used by the attribution engine:
//! - Gradient-boosted trees (the default family)
//! - Random forests
//! - Ridge regression
//!
//! plus k-fold cross-validation and the [`ModelSelector`] that picks
//! between them.

mod models;
mod selector;
pub mod cross_validation;
pub mod decision_tree;
pub mod gradient_boosting;
pub mod linear_models;
pub mod random_forest;

pub use cross_validation::{CVResults, CVSplit, CrossValidator};
pub use decision_tree::{DecisionTree, TreeNode};
pub use gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
pub use linear_models::RidgeRegression;
pub use models::{FittedModel, ModelFamily, ModelMetrics, Regressor};
pub use random_forest::{RandomForest, RandomForestConfig};
pub use selector::{CandidateScore, ModelSelector, SelectedModel};
