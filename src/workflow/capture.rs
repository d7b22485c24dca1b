use anyhow::Context;
use chrono::Local;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tokio::time::sleep;

use crate::common::shutdown::ShutdownSignal;
use crate::workflow::processors::artifacts::ImageProcessor;

/// `capture_cam_<channel>_<timestamp>.jpg`
pub fn capture_file_name(channel: u32, timestamp: &str) -> String {
    format!("capture_cam_{}_{}.jpg", channel, timestamp)
}

/// Grab one frame from `channel` into `directory`, where the watcher picks it up.
pub fn capture_once(processor: &dyn ImageProcessor, channel: u32, directory: &Path) -> anyhow::Result<PathBuf> {
    let frame = processor
        .capture_from_device(channel)
        .with_context(|| format!("failed to capture from channel {}", channel))?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S%.3f").to_string();
    let name = capture_file_name(channel, &timestamp);
    let target = directory.join(&name);
    let partial = directory.join(format!(".{}.partial", name));
    std::fs::write(&partial, &frame).with_context(|| format!("failed to write {:?}", partial))?;
    std::fs::rename(&partial, &target).with_context(|| format!("failed to move {:?} into place", partial))?;
    Ok(target)
}

/// Capture a frame every `interval` until shutdown.
pub async fn capture_loop(
    processor: Arc<dyn ImageProcessor>,
    channel: u32,
    directory: PathBuf,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    info!("Capturing from channel {} every {:?}", channel, interval);
    while !shutdown.is_triggered() {
        let processor = Arc::clone(&processor);
        let directory = directory.clone();
        match spawn_blocking(move || capture_once(processor.as_ref(), channel, &directory)).await {
            Ok(Ok(path)) => info!("Captured {:?}", path),
            Ok(Err(err)) => error!("{:#}", err),
            Err(err) => error!("Capture task panicked: {}", err),
        }

        tokio::select! {
            _ = sleep(interval) => {}
            _ = shutdown.triggered() => break,
        }
    }
}
