use anyhow::anyhow;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinSet, spawn_blocking};

use crate::common::BUILD_RETRY_DELAY_MS;
use crate::common::errors::{CapabilityError, ErrorKind, PipelineError};
use crate::common::shutdown::ShutdownSignal;
use crate::config::AppConfig;
use crate::database::{FailedSchema, ProcessedSchema, ProcessedSet};
use crate::models::{FileState, UploadOutcome, WatchedFile};
use crate::workflow::processors::analysis::{AnalysisInput, AnalysisOrchestrator, VisionProvider};
use crate::workflow::processors::artifacts::{ArtifactBuilder, ImageProcessor};
use crate::workflow::processors::classify::classify;
use crate::workflow::processors::upload::{UploadTransport, Uploader};
use crate::workflow::types::InFlight;
use crate::workflow::watcher::{Completion, CompletionKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Uploaded,
    Failed { stage: FileState, reason: String },
    /// Shutdown arrived before the file finished; it is picked up again next run.
    Deferred { at: FileState },
}

impl FileOutcome {
    fn completion_kind(&self) -> CompletionKind {
        match self {
            FileOutcome::Uploaded => CompletionKind::Uploaded,
            FileOutcome::Failed { .. } => CompletionKind::Failed,
            FileOutcome::Deferred { .. } => CompletionKind::Deferred,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub uploaded: usize,
    pub failed: usize,
    pub deferred: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Uploaded => self.uploaded += 1,
            FileOutcome::Failed { .. } => self.failed += 1,
            FileOutcome::Deferred { .. } => self.deferred += 1,
        }
    }
}

/// Drives each file through classify, analyze, build and upload.
pub struct PipelineController {
    base_url: String,
    workers: usize,
    analysis: AnalysisOrchestrator,
    builder: ArtifactBuilder,
    uploader: Uploader,
    processed: Arc<ProcessedSet>,
    in_flight: InFlight,
    read_retries: u32,
}

impl PipelineController {
    pub fn new(
        config: &AppConfig,
        processed: Arc<ProcessedSet>,
        providers: Vec<Arc<dyn VisionProvider>>,
        processor: Arc<dyn ImageProcessor>,
        transport: Arc<dyn UploadTransport>,
    ) -> Self {
        Self {
            base_url: config.base_url.clone(),
            workers: config.workers.max(1),
            analysis: AnalysisOrchestrator::new(
                providers,
                config.provider_timeout(),
                config.analysis_mode,
            ),
            builder: ArtifactBuilder::new(processor, config),
            uploader: Uploader::new(transport, config.retry.clone(), config.upload_timeout()),
            processed,
            in_flight: InFlight::default(),
            read_retries: config.build_retries.max(1),
        }
    }

    pub fn processed(&self) -> &Arc<ProcessedSet> {
        &self.processed
    }

    /// Run one file to a terminal state, or stop early on shutdown.
    pub async fn process(&self, mut file: WatchedFile, shutdown: &ShutdownSignal) -> (WatchedFile, FileOutcome) {
        let Some(_guard) = self.in_flight.try_acquire(file.name.clone()) else {
            warn!("{} is already being processed; skipping", file.name);
            let at = file.state;
            return (file, FileOutcome::Deferred { at });
        };

        let start = Instant::now();
        let outcome = match self.drive(&mut file, shutdown).await {
            Ok(outcome) => outcome,
            Err(err) => self.fail(&mut file, err).await,
        };

        match &outcome {
            FileOutcome::Uploaded => info!(
                duration = &*format!("{:?}", start.elapsed());
                "Pushed {} to {}",
                file.name,
                file.target_url.as_deref().unwrap_or_default()
            ),
            FileOutcome::Failed { stage, reason } => {
                warn!("{} failed after {:?}: {}", file.name, stage, reason)
            }
            FileOutcome::Deferred { at } => {
                info!("{} deferred at {:?} by shutdown", file.name, at)
            }
        }
        (file, outcome)
    }

    async fn drive(&self, file: &mut WatchedFile, shutdown: &ShutdownSignal) -> Result<FileOutcome, PipelineError> {
        let (target_url, media_type) = classify(&file.path, &self.base_url)?;
        file.media_type = Some(media_type);
        file.target_url = Some(target_url.clone());
        advance(file, FileState::Classified)?;
        if shutdown.is_triggered() {
            return Ok(FileOutcome::Deferred { at: file.state });
        }

        let bytes = read_source(&file.path, self.read_retries).await?;
        let tags = self
            .analysis
            .analyze(
                AnalysisInput {
                    name: &file.name,
                    bytes: &bytes,
                },
                media_type,
            )
            .await;
        drop(bytes);
        advance(file, FileState::Analyzed)?;
        if shutdown.is_triggered() {
            return Ok(FileOutcome::Deferred { at: file.state });
        }

        let artifact = self.builder.build(file).await?;
        advance(file, FileState::Built)?;
        if shutdown.is_triggered() {
            return Ok(FileOutcome::Deferred { at: file.state });
        }

        let record = self.uploader.upload(&target_url, file, &artifact, &tags).await;
        let status = match record.outcome {
            UploadOutcome::Success { status } => status,
            UploadOutcome::Failure(kind) => {
                let reason = record.last_error.unwrap_or_else(|| format!("{:?}", kind));
                return Err(PipelineError::Permanent(anyhow!(
                    "upload failed after {} attempt(s): {}",
                    record.attempts,
                    reason
                )));
            }
        };

        let processed = Arc::clone(&self.processed);
        let name = file.name.clone();
        let schema = ProcessedSchema {
            uploaded_at_ms: Utc::now().timestamp_millis(),
            target_url,
            attempts: record.attempts,
            hash: record.content_hash.unwrap_or_default(),
        };
        spawn_blocking(move || processed.mark_uploaded(&name, &schema))
            .await
            .map_err(|err| PipelineError::Fatal(anyhow!(err)))?
            .map_err(|err| {
                PipelineError::Fatal(err.context(format!("HTTP {} accepted but not recorded", status)))
            })?;
        advance(file, FileState::Uploaded)?;
        Ok(FileOutcome::Uploaded)
    }

    async fn fail(&self, file: &mut WatchedFile, err: PipelineError) -> FileOutcome {
        let stage = file.state;
        let reason = err.to_string();
        if err.kind() == ErrorKind::Fatal {
            error!("{} hit a fatal error: {}", file.name, reason);
        }
        if let Err(err) = file.advance(FileState::Failed) {
            error!("{:#}", err);
        }

        let processed = Arc::clone(&self.processed);
        let name = file.name.clone();
        let record = FailedSchema {
            failed_at_ms: Utc::now().timestamp_millis(),
            stage: format!("{:?}", stage),
            reason: reason.clone(),
        };
        match spawn_blocking(move || processed.mark_failed(&name, &record)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Failed to record failure of {}: {:#}", file.name, err),
            Err(err) => error!("Failed to record failure of {}: {}", file.name, err),
        }

        FileOutcome::Failed { stage, reason }
    }

    /// Worker pool: take files from `files` with at most `workers` in flight
    /// and report every outcome on `completions`. Returns when the sender side
    /// is closed or shutdown is triggered, after in-flight files settle.
    pub async fn run(
        self: Arc<Self>,
        mut files: mpsc::Receiver<WatchedFile>,
        completions: mpsc::UnboundedSender<Completion>,
        mut shutdown: ShutdownSignal,
    ) -> RunSummary {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();

        loop {
            let file = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                received = files.recv() => match received {
                    Some(file) => file,
                    None => break,
                },
            };

            while let Some(joined) = tasks.try_join_next() {
                settle(&mut summary, joined);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    let _ = completions.send(Completion {
                        name: file.name.clone(),
                        kind: CompletionKind::Deferred,
                    });
                    summary.deferred += 1;
                    break;
                }
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let controller = Arc::clone(&self);
            let completions = completions.clone();
            let signal = shutdown.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let (file, outcome) = controller.process(file, &signal).await;
                let _ = completions.send(Completion {
                    name: file.name,
                    kind: outcome.completion_kind(),
                });
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            settle(&mut summary, joined);
        }
        info!(
            "Pipeline stopped: {} uploaded, {} failed, {} deferred",
            summary.uploaded, summary.failed, summary.deferred
        );
        summary
    }
}

fn advance(file: &mut WatchedFile, next: FileState) -> Result<(), PipelineError> {
    debug!("{}: {:?} -> {:?}", file.name, file.state, next);
    file.advance(next).map_err(PipelineError::Permanent)
}

async fn read_source(path: &Path, retries: u32) -> Result<Vec<u8>, PipelineError> {
    let delay = Duration::from_millis(BUILD_RETRY_DELAY_MS);
    read_with_retry(|| tokio::fs::read(path), retries, delay)
        .await
        .map_err(|err| match err {
            PipelineError::Transient(e) => PipelineError::Transient(e.context(format!("failed to read {:?}", path))),
            PipelineError::Permanent(e) => PipelineError::Permanent(e.context(format!("failed to read {:?}", path))),
            other => other,
        })
}

/// Busy or interrupted reads are retried with a linear delay; anything else fails at once.
async fn read_with_retry<F, Fut>(mut read: F, retries: u32, delay: Duration) -> Result<Vec<u8>, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<Vec<u8>>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match read().await.map_err(CapabilityError::from_io) {
            Ok(bytes) => return Ok(bytes),
            Err(err) if err.is_transient() && attempts < retries => {
                let wait = delay * attempts;
                warn!("Read failed (attempt {}), retrying in {:?}: {}", attempts, wait, err);
                tokio::time::sleep(wait).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn settle(summary: &mut RunSummary, joined: Result<FileOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => summary.record(&outcome),
        Err(err) => {
            error!("Worker task panicked: {}", err);
            summary.failed += 1;
        }
    }
}
