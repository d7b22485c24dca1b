use anyhow::anyhow;
use dotenv::dotenv;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::common::errors::PipelineError;
use crate::common::{
    DEFAULT_LOCATION_TAGS, DEFAULT_THUMBNAIL_SIZE, DEFAULT_UPLOAD_ATTEMPTS, DEFAULT_WORKERS,
    MAX_BUILD_RETRIES,
};

const ENV_PREFIX: &str = "PHOTOPUSHER_";

/// How provider results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Ask every provider and merge whatever succeeded.
    #[default]
    Merge,
    /// Stop at the first provider that answers.
    FirstSuccess,
}

/// Which image the watermark is drawn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkSource {
    #[default]
    Original,
    Thumbnail,
}

/// Retry configuration for transient upload failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub initial_backoff_ms: u64,
    /// Upper bound for a single delay
    pub max_backoff_ms: u64,
    /// Add up to 50% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_UPLOAD_ATTEMPTS,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt number `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Collection endpoint; files go to `{base_url}/photo` or `{base_url}/video`
    pub base_url: String,
    /// Directory watched for new captures
    pub directory: PathBuf,
    /// redb file holding the processed set and failure log
    pub db_path: PathBuf,
    /// Where thumbnails are written, `<directory>/thumbs` when unset
    pub thumbs_dir: Option<PathBuf>,
    /// Where watermarked files are written, `<directory>/output` when unset
    pub output_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Files modified more recently than this are left for a later tick
    pub min_file_age_ms: u64,
    /// Files processed concurrently; 1 runs the pipeline serially
    pub workers: usize,
    pub provider_timeout_ms: u64,
    pub analysis_mode: AnalysisMode,
    pub location_tags: Vec<String>,
    /// Longest side of a thumbnail in pixels
    pub thumbnail_size: u32,
    pub watermark_source: WatermarkSource,
    /// Logo composited onto the watermarked image; a shaded band is drawn when unset
    pub watermark_logo: Option<PathBuf>,
    pub build_retries: u32,
    pub upload_timeout_secs: u64,
    pub retry: RetryConfig,
    pub logging_level: String,
    /// Check `{base_url}/ping` before starting
    pub ping: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            directory: PathBuf::from("."),
            db_path: PathBuf::from("./db/photopusher.redb"),
            thumbs_dir: None,
            output_dir: None,
            poll_interval_ms: 1_000,
            min_file_age_ms: 500,
            workers: DEFAULT_WORKERS,
            provider_timeout_ms: 10_000,
            analysis_mode: AnalysisMode::default(),
            location_tags: DEFAULT_LOCATION_TAGS.iter().map(|s| s.to_string()).collect(),
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            watermark_source: WatermarkSource::default(),
            watermark_logo: None,
            build_retries: MAX_BUILD_RETRIES,
            upload_timeout_secs: 30,
            retry: RetryConfig::default(),
            logging_level: "info".to_string(),
            ping: true,
        }
    }
}

/// `PHOTOPUSHER_*` variables. Anything left unset keeps its default.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    url: Option<String>,
    directory: Option<PathBuf>,
    db_path: Option<PathBuf>,
    thumbs_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    poll_interval_ms: Option<u64>,
    min_file_age_ms: Option<u64>,
    workers: Option<usize>,
    provider_timeout_ms: Option<u64>,
    analysis_mode: Option<AnalysisMode>,
    location_tags: Option<Vec<String>>,
    thumbnail_size: Option<u32>,
    watermark_source: Option<WatermarkSource>,
    watermark_logo: Option<PathBuf>,
    build_retries: Option<u32>,
    upload_timeout_secs: Option<u64>,
    upload_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    backoff_jitter: Option<bool>,
}

impl AppConfig {
    /// Defaults, then `.env`, then the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_env()?;
        let mut config = Self::default();
        config.apply(overrides);
        if let Ok(level) = std::env::var("LOGGING_LEVEL") {
            config.logging_level = level;
        }
        Ok(config)
    }

    fn apply(&mut self, env: EnvOverrides) {
        if let Some(v) = env.url {
            self.base_url = v;
        }
        if let Some(v) = env.directory {
            self.directory = v;
        }
        if let Some(v) = env.db_path {
            self.db_path = v;
        }
        if env.thumbs_dir.is_some() {
            self.thumbs_dir = env.thumbs_dir;
        }
        if env.output_dir.is_some() {
            self.output_dir = env.output_dir;
        }
        if let Some(v) = env.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = env.min_file_age_ms {
            self.min_file_age_ms = v;
        }
        if let Some(v) = env.workers {
            self.workers = v;
        }
        if let Some(v) = env.provider_timeout_ms {
            self.provider_timeout_ms = v;
        }
        if let Some(v) = env.analysis_mode {
            self.analysis_mode = v;
        }
        if let Some(v) = env.location_tags {
            self.location_tags = v;
        }
        if let Some(v) = env.thumbnail_size {
            self.thumbnail_size = v;
        }
        if let Some(v) = env.watermark_source {
            self.watermark_source = v;
        }
        if env.watermark_logo.is_some() {
            self.watermark_logo = env.watermark_logo;
        }
        if let Some(v) = env.build_retries {
            self.build_retries = v;
        }
        if let Some(v) = env.upload_timeout_secs {
            self.upload_timeout_secs = v;
        }
        if let Some(v) = env.upload_attempts {
            self.retry.max_attempts = v;
        }
        if let Some(v) = env.initial_backoff_ms {
            self.retry.initial_backoff_ms = v;
        }
        if let Some(v) = env.max_backoff_ms {
            self.retry.max_backoff_ms = v;
        }
        if let Some(v) = env.backoff_jitter {
            self.retry.jitter = v;
        }
    }

    /// Reject settings the pipeline cannot run with. Every error here is fatal.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fatal = |msg: String| Err(PipelineError::Fatal(anyhow!(msg)));

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return fatal(format!("base URL must be http(s), got {:?}", self.base_url));
        }
        if self.workers == 0 {
            return fatal("workers must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            return fatal("upload attempts must be at least 1".to_string());
        }
        if self.build_retries == 0 {
            return fatal("build retries must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return fatal("poll interval must be positive".to_string());
        }
        if self.thumbnail_size == 0 {
            return fatal("thumbnail size must be positive".to_string());
        }
        if self.logging_level.parse::<LevelFilter>().is_err() {
            return fatal(format!("unknown logging level {:?}", self.logging_level));
        }
        Ok(())
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.thumbs_dir
            .clone()
            .unwrap_or_else(|| self.directory.join("thumbs"))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.directory.join("output"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_file_age(&self) -> Duration {
        Duration::from_millis(self.min_file_age_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.logging_level.parse().unwrap_or(LevelFilter::Info)
    }
}
