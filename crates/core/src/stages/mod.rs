//! Pipeline stages: router, research, meta, consultants, synthesis, review.

pub mod consultants;
pub mod meta;
pub mod prompts;
pub mod research;
pub mod review;
pub mod router;
pub mod synthesis;

pub use consultants::{ConsultationResult, ConsultationStatus};
pub use research::RawFindings;
pub use router::Classification;
