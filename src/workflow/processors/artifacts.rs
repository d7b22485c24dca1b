use anyhow::{Context, anyhow};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::task::spawn_blocking;

use crate::common::BUILD_RETRY_DELAY_MS;
use crate::common::errors::{CapabilityError, PipelineError};
use crate::config::{AppConfig, WatermarkSource};
use crate::models::{Artifact, MediaType, WatchedFile};
use crate::utils::{PathExt, thumbnail_path, watermarked_path};

/// Blocking image and video operations. Called from `spawn_blocking`.
pub trait ImageProcessor: Send + Sync {
    /// Encoded thumbnail of `src`. Videos yield a JPEG of their first frame.
    fn make_thumbnail(&self, src: &Path, media_type: MediaType) -> Result<Vec<u8>, CapabilityError>;

    /// Encoded copy of `src` with the watermark applied.
    fn apply_watermark(&self, src: &Path, media_type: MediaType) -> Result<Vec<u8>, CapabilityError>;

    /// One JPEG frame grabbed from capture device `channel`.
    fn capture_from_device(&self, channel: u32) -> Result<Vec<u8>, CapabilityError>;
}

#[derive(Clone)]
pub struct ArtifactBuilder {
    processor: Arc<dyn ImageProcessor>,
    thumbs_dir: PathBuf,
    output_dir: PathBuf,
    watermark_source: WatermarkSource,
    retries: u32,
    retry_delay: Duration,
}

impl ArtifactBuilder {
    pub fn new(processor: Arc<dyn ImageProcessor>, config: &AppConfig) -> Self {
        Self {
            processor,
            thumbs_dir: config.thumbs_dir(),
            output_dir: config.output_dir(),
            watermark_source: config.watermark_source,
            retries: config.build_retries.max(1),
            retry_delay: Duration::from_millis(BUILD_RETRY_DELAY_MS),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Produce the thumbnail and the watermarked copy for a classified file.
    ///
    /// Both files are on disk when this returns `Ok`. On failure nothing the
    /// build wrote is left behind.
    pub async fn build(&self, file: &WatchedFile) -> Result<Artifact, PipelineError> {
        let media_type = file
            .media_type
            .ok_or_else(|| PipelineError::Permanent(anyhow!("{} was never classified", file.name)))?;
        let builder = self.clone();
        let source = file.path.clone();

        spawn_blocking(move || builder.build_blocking(&source, media_type))
            .await
            .map_err(|err| PipelineError::Permanent(anyhow!(err).context("artifact build task panicked")))?
    }

    fn build_blocking(&self, source: &Path, media_type: MediaType) -> Result<Artifact, PipelineError> {
        let start = Instant::now();
        for dir in [&self.thumbs_dir, &self.output_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {:?}", dir))
                .map_err(PipelineError::Permanent)?;
        }

        let thumbnail = thumbnail_path(&self.thumbs_dir, source, media_type);
        self.with_retry("thumbnail", source, || {
            let bytes = self.processor.make_thumbnail(source, media_type)?;
            write_atomically(&thumbnail, &bytes)
        })?;

        let (stamp_source, stamp_media) = match self.watermark_source {
            WatermarkSource::Original => (source, media_type),
            WatermarkSource::Thumbnail => (thumbnail.as_path(), MediaType::Photo),
        };
        let watermarked = watermarked_path(&self.output_dir, source, media_type, stamp_media);
        let stamped = self.with_retry("watermark", source, || {
            let bytes = self.processor.apply_watermark(stamp_source, stamp_media)?;
            write_atomically(&watermarked, &bytes)
        });
        if let Err(err) = stamped {
            let _ = fs::remove_file(&thumbnail);
            return Err(err);
        }

        info!(
            duration = &*format!("{:?}", start.elapsed());
            "Built artifacts for {}",
            source.file_name_string()
        );
        Ok(Artifact {
            source: source.to_path_buf(),
            media_type,
            thumbnail,
            watermarked,
        })
    }

    fn with_retry<F>(&self, step: &str, source: &Path, mut op: F) -> Result<(), PipelineError>
    where
        F: FnMut() -> Result<(), CapabilityError>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op() {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempts < self.retries => {
                    let delay = self.retry_delay * attempts;
                    warn!(
                        "Failed {} for {:?} (attempt {}), retrying in {:?}: {}",
                        step, source, attempts, delay, err
                    );
                    thread::sleep(delay);
                }
                Err(err) => {
                    let err = PipelineError::from(err);
                    return Err(match err {
                        PipelineError::Transient(e) => PipelineError::Transient(e.context(format!(
                            "{} for {:?} failed after {} attempts",
                            step, source, attempts
                        ))),
                        PipelineError::Permanent(e) => PipelineError::Permanent(
                            e.context(format!("{} for {:?} failed", step, source)),
                        ),
                        other => other,
                    });
                }
            }
        }
    }
}

/// Write next to the destination under a hidden name, then rename into place.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CapabilityError> {
    let partial = path.with_file_name(format!(".{}.partial", path.file_name_string()));
    fs::write(&partial, bytes).map_err(CapabilityError::from_io)?;
    fs::rename(&partial, path).map_err(|err| {
        let _ = fs::remove_file(&partial);
        CapabilityError::from_io(err)
    })
}
