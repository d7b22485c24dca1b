pub mod processed;

pub use processed::{FailedSchema, ProcessedSchema, ProcessedSet};
