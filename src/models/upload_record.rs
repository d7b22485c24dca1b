use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadFailureKind {
    /// Retries ran out on timeouts, 5xx answers or dropped connections.
    Exhausted,
    /// The endpoint rejected the request (4xx).
    Rejected,
    /// The local files could not be read for sending.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success { status: u16 },
    Failure(UploadFailureKind),
}

/// Result of one file's upload. Only a success is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub outcome: UploadOutcome,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// blake3 of the original bytes, once they were read.
    pub content_hash: Option<String>,
}

impl UploadRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UploadOutcome::Success { .. })
    }

    pub fn retries_used(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}
