//! Upload - sends one file with its artifacts and tags to the collection endpoint.
//!
//! Every attempt of one upload carries the same `Idempotency-Key`, derived
//! from the file name and the blake3 of its bytes, so the receiver can
//! recognise a resubmission even across a restart.

use anyhow::Context;
use arrayvec::ArrayString;
use async_trait::async_trait;
use bytes::Bytes;
use log::{info, warn};
use rand::Rng;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::{sleep, timeout};

use crate::config::RetryConfig;
use crate::models::{
    Artifact, MediaType, TagSet, UploadFailureKind, UploadOutcome, UploadRecord, WatchedFile,
};
use crate::utils::PathExt;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Invalid(_))
    }
}

/// Everything one POST sends. Cloning shares the buffers.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub file_name: String,
    pub media_type: MediaType,
    pub idempotency_key: String,
    pub content_hash: String,
    pub original: Bytes,
    pub thumbnail_name: String,
    pub thumbnail: Bytes,
    pub watermarked_name: String,
    pub watermarked: Bytes,
    /// JSON document describing the file and its tags.
    pub metadata: String,
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// POST `payload` to `url` and return the response status.
    async fn post(&self, url: &str, payload: &UploadPayload) -> Result<u16, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Transient,
    Permanent,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        500..=599 => StatusClass::Transient,
        _ => StatusClass::Permanent,
    }
}

#[derive(Serialize)]
struct UploadMetadata<'a> {
    name: &'a str,
    media_type: MediaType,
    discovered_at: String,
    hash: &'a str,
    thumbnail: &'a str,
    watermarked: &'a str,
    #[serde(flatten)]
    tags: &'a TagSet,
}

pub struct Uploader {
    transport: Arc<dyn UploadTransport>,
    retry: RetryConfig,
    attempt_timeout: Duration,
}

impl Uploader {
    pub fn new(transport: Arc<dyn UploadTransport>, retry: RetryConfig, attempt_timeout: Duration) -> Self {
        Self {
            transport,
            retry,
            attempt_timeout,
        }
    }

    pub async fn upload(
        &self,
        target_url: &str,
        file: &WatchedFile,
        artifact: &Artifact,
        tags: &TagSet,
    ) -> UploadRecord {
        let payload = match prepare_payload(file, artifact, tags).await {
            Ok(payload) => payload,
            Err(err) => {
                return UploadRecord {
                    outcome: UploadOutcome::Failure(UploadFailureKind::Local),
                    attempts: 0,
                    last_error: Some(format!("{:#}", err)),
                    content_hash: None,
                };
            }
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let start = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match timeout(self.attempt_timeout, self.transport.post(target_url, &payload)).await {
                Ok(Ok(status)) => match classify_status(status) {
                    StatusClass::Success => {
                        info!(
                            duration = &*format!("{:?}", start.elapsed());
                            "Uploaded {} to {} (HTTP {}, attempt {})",
                            file.name, target_url, status, attempts
                        );
                        return UploadRecord {
                            outcome: UploadOutcome::Success { status },
                            attempts,
                            last_error: None,
                            content_hash: Some(payload.content_hash),
                        };
                    }
                    StatusClass::Permanent => {
                        return UploadRecord {
                            outcome: UploadOutcome::Failure(UploadFailureKind::Rejected),
                            attempts,
                            last_error: Some(format!("rejected with HTTP {}", status)),
                            content_hash: Some(payload.content_hash),
                        };
                    }
                    StatusClass::Transient => format!("HTTP {}", status),
                },
                Ok(Err(err)) if !err.is_transient() => {
                    return UploadRecord {
                        outcome: UploadOutcome::Failure(UploadFailureKind::Rejected),
                        attempts,
                        last_error: Some(err.to_string()),
                        content_hash: Some(payload.content_hash),
                    };
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("no response within {:?}", self.attempt_timeout),
            };

            if attempts >= max_attempts {
                return UploadRecord {
                    outcome: UploadOutcome::Failure(UploadFailureKind::Exhausted),
                    attempts,
                    last_error: Some(error),
                    content_hash: Some(payload.content_hash),
                };
            }

            let delay = self.delay_after(attempts);
            warn!(
                "Upload of {} failed (attempt {}/{}), retrying in {:?}: {}",
                file.name, attempts, max_attempts, delay, error
            );
            sleep(delay).await;
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.retry.backoff(attempt);
        if !self.retry.jitter || base.is_zero() {
            return base;
        }
        let half = base.as_millis() as u64 / 2;
        base + Duration::from_millis(rand::rng().random_range(0..=half))
    }
}

async fn read(path: &Path) -> anyhow::Result<Bytes> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {:?} for upload", path))?;
    Ok(Bytes::from(bytes))
}

async fn prepare_payload(
    file: &WatchedFile,
    artifact: &Artifact,
    tags: &TagSet,
) -> anyhow::Result<UploadPayload> {
    let original = read(&file.path).await?;
    let thumbnail = read(&artifact.thumbnail).await?;
    let watermarked = read(&artifact.watermarked).await?;

    let hash: ArrayString<64> = blake3::hash(&original).to_hex();
    let idempotency_key = blake3::Hasher::new()
        .update(file.name.as_bytes())
        .update(hash.as_bytes())
        .finalize()
        .to_hex()
        .to_string();

    let thumbnail_name = artifact.thumbnail.file_name_string();
    let watermarked_name = artifact.watermarked.file_name_string();
    let metadata = serde_json::to_string(&UploadMetadata {
        name: &file.name,
        media_type: artifact.media_type,
        discovered_at: file.discovered_at.to_rfc3339(),
        hash: &hash,
        thumbnail: &thumbnail_name,
        watermarked: &watermarked_name,
        tags,
    })?;

    Ok(UploadPayload {
        file_name: file.name.clone(),
        media_type: artifact.media_type,
        idempotency_key,
        content_hash: hash.to_string(),
        original,
        thumbnail_name,
        thumbnail,
        watermarked_name,
        watermarked,
        metadata,
    })
}
