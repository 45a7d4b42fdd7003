//! Input data model
//!
//! - [`Dataset`] - entity rows by named numeric/categorical columns, content-hashed
//! - [`AnalysisRequest`] - immutable parameters of one attribution run

mod dataset;
mod request;

pub use dataset::{Column, ColumnData, ColumnKind, Dataset};
pub use request::{AnalysisRequest, AnalysisRequestBuilder};
