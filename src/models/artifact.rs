use std::path::PathBuf;

use super::watched_file::MediaType;

/// Derived files of one source capture. Both stay on disk after upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub source: PathBuf,
    pub media_type: MediaType,
    pub thumbnail: PathBuf,
    pub watermarked: PathBuf,
}
