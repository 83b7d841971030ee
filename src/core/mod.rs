pub mod error;
pub mod types;

pub use error::GradeError;
pub use types::{ExtractionResult, FrameContext, Record, RecordKind, RunMode};
