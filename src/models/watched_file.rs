use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::utils::PathExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl MediaType {
    /// Path segment of the collection endpoint for this media type.
    pub fn endpoint(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    Discovered,
    Classified,
    Analyzed,
    Built,
    Uploaded,
    Failed,
}

impl FileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileState::Uploaded | FileState::Failed)
    }

    /// Legal moves of the per-file state machine. Any non-terminal state may fail.
    pub fn can_advance_to(&self, next: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (Discovered, Classified)
                | (Classified, Analyzed)
                | (Analyzed, Built)
                | (Built, Uploaded)
                | (Discovered | Classified | Analyzed | Built, Failed)
        )
    }
}

#[derive(Debug, Clone)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub name: String,
    pub discovered_at: DateTime<Utc>,
    pub media_type: Option<MediaType>,
    pub target_url: Option<String>,
    pub state: FileState,
}

impl WatchedFile {
    pub fn new(path: PathBuf) -> Self {
        let name = path.file_name_string();
        Self {
            path,
            name,
            discovered_at: Utc::now(),
            media_type: None,
            target_url: None,
            state: FileState::Discovered,
        }
    }

    /// Move to `next`, refusing transitions the state machine does not allow.
    pub fn advance(&mut self, next: FileState) -> anyhow::Result<()> {
        if !self.state.can_advance_to(next) {
            anyhow::bail!(
                "illegal transition {:?} -> {:?} for {}",
                self.state,
                next,
                self.name
            );
        }
        self.state = next;
        Ok(())
    }
}
