use anyhow::anyhow;
use log::info;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::common::errors::PipelineError;
use crate::common::shutdown::ShutdownSignal;
use crate::config::AppConfig;
use crate::workflow::controller::{PipelineController, RunSummary};
use crate::workflow::watcher::{DirectoryWatcher, LoopAction};

/// Runs the watcher and the worker pool side by side until the watcher stops.
pub struct Monitor {
    config: AppConfig,
    controller: Arc<PipelineController>,
}

impl Monitor {
    pub fn new(config: AppConfig, controller: PipelineController) -> Self {
        Self {
            config,
            controller: Arc::new(controller),
        }
    }

    /// Watch until shutdown or until `loop_action` breaks, then let in-flight
    /// files settle. An unreadable directory fails before anything starts.
    pub async fn start(
        self,
        shutdown: ShutdownSignal,
        loop_action: Option<LoopAction>,
    ) -> Result<RunSummary, PipelineError> {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let watcher = DirectoryWatcher::new(&self.config, self.controller.processed(), completion_rx)?;
        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.config.workers.max(1));

        let pool = tokio::spawn(Arc::clone(&self.controller).run(
            dispatch_rx,
            completion_tx,
            shutdown.clone(),
        ));

        let ticks = watcher.run(dispatch_tx, shutdown, loop_action).await;
        info!("Watcher stopped after {} ticks", ticks);

        pool.await
            .map_err(|err| PipelineError::Fatal(anyhow!(err).context("worker pool panicked")))
    }
}
