//! Shared doubles for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use photopusher::common::errors::CapabilityError;
use photopusher::config::{AppConfig, RetryConfig};
use photopusher::database::ProcessedSet;
use photopusher::models::{MediaType, TagSet};
use photopusher::workflow::PipelineController;
use photopusher::workflow::processors::analysis::{AnalysisInput, ProviderError, VisionProvider};
use photopusher::workflow::processors::artifacts::ImageProcessor;
use photopusher::workflow::processors::upload::{TransportError, UploadPayload, UploadTransport};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize logging for tests
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Vision provider that answers every file with the same tags.
pub struct FixedProvider(pub TagSet);

#[async_trait]
impl VisionProvider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn analyze_photo(&self, _: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
        Ok(self.0.clone())
    }

    async fn analyze_video(&self, _: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
        Ok(self.0.clone())
    }
}

/// Image processor that writes fixed bytes instead of touching real images.
pub struct FakeProcessor;

impl ImageProcessor for FakeProcessor {
    fn make_thumbnail(&self, _: &Path, _: MediaType) -> Result<Vec<u8>, CapabilityError> {
        Ok(b"thumb".to_vec())
    }

    fn apply_watermark(&self, _: &Path, _: MediaType) -> Result<Vec<u8>, CapabilityError> {
        Ok(b"stamped".to_vec())
    }

    fn capture_from_device(&self, _: u32) -> Result<Vec<u8>, CapabilityError> {
        Ok(b"frame".to_vec())
    }
}

/// Transport that plays back scripted replies (201 once they run out) and
/// records every request.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<u16, TransportError>>>,
    delay: Duration,
    calls: AtomicUsize,
    pub requests: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<u16, TransportError>>) -> Arc<Self> {
        Self::slow(replies, Duration::ZERO)
    }

    pub fn slow(replies: Vec<Result<u16, TransportError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            delay,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(url, file name, metadata)` of every request so far.
    pub fn requests(&self) -> Vec<(String, String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn post(&self, url: &str, payload: &UploadPayload) -> Result<u16, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((
            url.to_string(),
            payload.file_name.clone(),
            payload.metadata.clone(),
        ));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        reply.unwrap_or(Ok(201))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: AppConfig,
}

impl Harness {
    pub fn new() -> Self {
        init_test_logging();
        let dir = TempDir::new().unwrap();
        let watched = dir.path().join("in");
        std::fs::create_dir_all(&watched).unwrap();
        let config = AppConfig {
            base_url: "http://192.168.1.3:8080".into(),
            directory: watched,
            db_path: dir.path().join("db/photopusher.redb"),
            poll_interval_ms: 5,
            min_file_age_ms: 0,
            workers: 2,
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                jitter: false,
            },
            ..AppConfig::default()
        };
        Self { dir, config }
    }

    pub fn drop_file(&self, name: &str) {
        std::fs::write(self.config.directory.join(name), b"capture bytes").unwrap();
    }

    pub fn open_db(&self) -> Arc<ProcessedSet> {
        Arc::new(ProcessedSet::open(&self.config.db_path).unwrap())
    }

    pub fn controller(
        &self,
        processed: Arc<ProcessedSet>,
        tags: TagSet,
        transport: Arc<ScriptedTransport>,
    ) -> PipelineController {
        PipelineController::new(
            &self.config,
            processed,
            vec![Arc::new(FixedProvider(tags)) as Arc<dyn VisionProvider>],
            Arc::new(FakeProcessor),
            transport,
        )
    }
}
