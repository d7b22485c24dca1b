use log::error;
use thiserror::Error;

/// How the pipeline reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown file type. Skip, never retry.
    Unsupported,
    /// Worth another attempt after a delay.
    Transient,
    /// Retrying cannot help. Abort the file.
    Permanent,
    /// The process cannot continue.
    Fatal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("transient failure: {0:#}")]
    Transient(anyhow::Error),

    #[error("permanent failure: {0:#}")]
    Permanent(anyhow::Error),

    #[error("fatal: {0:#}")]
    Fatal(anyhow::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Unsupported(_) => ErrorKind::Unsupported,
            PipelineError::Transient(_) => ErrorKind::Transient,
            PipelineError::Permanent(_) => ErrorKind::Permanent,
            PipelineError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Failure reported by an image-processing capability.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{0:#}")]
    Transient(anyhow::Error),

    #[error("{0:#}")]
    Permanent(anyhow::Error),
}

impl CapabilityError {
    /// Classify an I/O error: contention and interruptions are transient, the rest is not.
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::Interrupted | Io::WouldBlock | Io::TimedOut | Io::ResourceBusy => {
                CapabilityError::Transient(err.into())
            }
            _ => CapabilityError::Permanent(err.into()),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CapabilityError::Transient(_))
    }
}

impl From<CapabilityError> for PipelineError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Transient(e) => PipelineError::Transient(e),
            CapabilityError::Permanent(e) => PipelineError::Permanent(e),
        }
    }
}

/// Log the whole context chain of an error and hand it back.
pub fn handle_error(err: anyhow::Error) -> anyhow::Error {
    error!("{:?}", err);
    err
}
