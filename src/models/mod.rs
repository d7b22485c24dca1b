pub mod artifact;
pub mod tag_set;
pub mod upload_record;
pub mod watched_file;

pub use artifact::Artifact;
pub use tag_set::{Tag, TagSet};
pub use upload_record::{UploadFailureKind, UploadOutcome, UploadRecord};
pub use watched_file::{FileState, MediaType, WatchedFile};
