//! Feature preparation
//!
//! Turns a raw [`Dataset`](crate::data::Dataset) into a numeric matrix:
//! - Missing value imputation (median, mean or zero; sentinel category)
//! - Ordinal encoding of categoricals
//! - Univariate top-k selection for wide tables
//! - Standard scaling, fitted per training split by the model selector

mod encoder;
mod imputer;
mod pipeline;
mod scaler;
pub mod feature_selection;

pub use encoder::OrdinalEncoder;
pub use feature_selection::{ScoreFunction, UnivariateSelector};
pub use imputer::{FilledColumn, ImputeStrategy, Imputer};
pub use pipeline::{FeatureSelector, PreparedData};
pub use scaler::StandardScaler;
