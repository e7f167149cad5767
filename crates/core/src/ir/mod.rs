//! Structured research IR: types, normalization, extraction, rendering.

pub mod extract;
pub mod normalize;
pub mod summarize;
pub mod types;

pub use extract::{extract, ExtractedIr, ExtractionInput};
pub use normalize::normalize;
pub use types::*;
