//! Polling directory watcher.
//!
//! Each tick lists the watched directory (top level only) and emits every
//! regular file that is neither recorded in the processed/failed tables nor
//! already handed out during this run. A file stays suppressed while it is in
//! flight; the workers report back through a completion channel, which is
//! drained at the start of every tick.

use anyhow::Context;
use filetime::FileTime;
use log::{debug, info, warn};
use path_clean::PathClean;
use std::collections::HashSet;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::common::errors::PipelineError;
use crate::common::shutdown::ShutdownSignal;
use crate::config::AppConfig;
use crate::database::ProcessedSet;
use crate::models::WatchedFile;

/// How a dispatched file left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Uploaded,
    Failed,
    /// Stopped by shutdown before reaching a terminal state.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub name: String,
    pub kind: CompletionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub emitted: usize,
    /// Files handed out and not yet reported back.
    pub in_flight: usize,
}

/// Hook run after every tick. Returning `Break` stops the watcher.
pub type LoopAction = Box<dyn FnMut(&TickReport) -> ControlFlow<()> + Send>;

pub struct DirectoryWatcher {
    directory: PathBuf,
    poll_interval: Duration,
    min_file_age: Duration,
    /// Names with a terminal record: processed or failed.
    known: HashSet<String>,
    /// Names emitted this run and not yet completed.
    seen: HashSet<String>,
    completions: mpsc::UnboundedReceiver<Completion>,
    tick: u64,
}

impl DirectoryWatcher {
    pub fn new(
        config: &AppConfig,
        processed: &ProcessedSet,
        completions: mpsc::UnboundedReceiver<Completion>,
    ) -> Result<Self, PipelineError> {
        let directory = config.directory.clean();
        fs::read_dir(&directory)
            .with_context(|| format!("cannot read watched directory {:?}", directory))
            .map_err(PipelineError::Fatal)?;

        let mut known = processed.processed_names().map_err(PipelineError::Fatal)?;
        known.extend(processed.failed_names().map_err(PipelineError::Fatal)?);

        Ok(Self {
            directory,
            poll_interval: config.poll_interval(),
            min_file_age: config.min_file_age(),
            known,
            seen: HashSet::new(),
            completions,
            tick: 0,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn in_flight(&self) -> usize {
        self.seen.len()
    }

    /// Fold worker reports into the suppression sets.
    pub fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions.try_recv() {
            self.seen.remove(&completion.name);
            match completion.kind {
                CompletionKind::Uploaded | CompletionKind::Failed => {
                    self.known.insert(completion.name);
                }
                CompletionKind::Deferred => {}
            }
        }
    }

    /// One listing of the directory. New files come back oldest first.
    pub fn poll_once(&mut self) -> anyhow::Result<Vec<WatchedFile>> {
        let entries = fs::read_dir(&self.directory)
            .with_context(|| format!("failed to list {:?}", self.directory))?;
        let now = SystemTime::now();

        let mut fresh = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry in {:?}: {}", self.directory, err);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || self.known.contains(&name) || self.seen.contains(&name) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };

            // Still being written, most likely.
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < self.min_file_age {
                debug!("{} is too young ({:?}), waiting", name, age);
                continue;
            }

            let modified = FileTime::from_last_modification_time(&metadata);
            let created = FileTime::from_creation_time(&metadata).unwrap_or(modified);
            fresh.push((created, name, entry.path().clean()));
        }

        sort_by_discovery(&mut fresh);

        Ok(fresh
            .into_iter()
            .map(|(_, name, path)| {
                self.seen.insert(name);
                WatchedFile::new(path)
            })
            .collect())
    }

    /// Poll until shutdown, the loop action breaks, or the workers hang up.
    /// Returns the number of ticks run.
    pub async fn run(
        mut self,
        dispatch: mpsc::Sender<WatchedFile>,
        mut shutdown: ShutdownSignal,
        mut loop_action: Option<LoopAction>,
    ) -> u64 {
        info!("Watching {:?} every {:?}", self.directory, self.poll_interval);

        while !shutdown.is_triggered() {
            self.drain_completions();
            self.tick += 1;

            let emitted = match self.poll_once() {
                Ok(files) => {
                    let count = files.len();
                    for file in files {
                        debug!("Discovered {}", file.name);
                        tokio::select! {
                            sent = dispatch.send(file) => {
                                if sent.is_err() {
                                    warn!("Workers are gone; stopping the watcher");
                                    return self.tick;
                                }
                            }
                            _ = shutdown.triggered() => return self.tick,
                        }
                    }
                    count
                }
                Err(err) => {
                    warn!("Skipping tick {}: {:#}", self.tick, err);
                    0
                }
            };

            let report = TickReport {
                tick: self.tick,
                emitted,
                in_flight: self.seen.len(),
            };
            if let Some(action) = loop_action.as_mut() {
                if action(&report).is_break() {
                    debug!("Loop action stopped the watcher after tick {}", self.tick);
                    break;
                }
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = shutdown.triggered() => break,
            }
        }

        self.tick
    }
}

/// Creation time ascending, then file name.
fn sort_by_discovery(files: &mut [(FileTime, String, PathBuf)]) {
    files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::shutdown::Shutdown;
    use crate::database::ProcessedSchema;
    use tempfile::TempDir;

    fn setup() -> (TempDir, AppConfig, ProcessedSet) {
        let dir = TempDir::new().unwrap();
        let watched = dir.path().join("in");
        fs::create_dir_all(&watched).unwrap();
        let config = AppConfig {
            base_url: "http://host".into(),
            directory: watched,
            poll_interval_ms: 5,
            min_file_age_ms: 0,
            ..AppConfig::default()
        };
        let processed = ProcessedSet::open(dir.path().join("db.redb")).unwrap();
        (dir, config, processed)
    }

    fn names(files: &[WatchedFile]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn unreadable_directory_is_fatal() {
        let (_dir, mut config, processed) = setup();
        config.directory = config.directory.join("missing");
        let (_tx, rx) = mpsc::unbounded_channel();

        let err = DirectoryWatcher::new(&config, &processed, rx).err().unwrap();
        assert_eq!(err.kind(), crate::common::errors::ErrorKind::Fatal);
    }

    #[test]
    fn emits_each_new_file_once() {
        let (_dir, config, processed) = setup();
        fs::write(config.directory.join("photo1.jpg"), b"a").unwrap();
        fs::write(config.directory.join(".hidden.jpg"), b"a").unwrap();
        fs::create_dir(config.directory.join("thumbs")).unwrap();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut watcher = DirectoryWatcher::new(&config, &processed, rx).unwrap();

        let first = watcher.poll_once().unwrap();
        assert_eq!(names(&first), vec!["photo1.jpg"]);
        assert!(watcher.poll_once().unwrap().is_empty());

        fs::write(config.directory.join("photo2.jpg"), b"b").unwrap();
        assert_eq!(names(&watcher.poll_once().unwrap()), vec!["photo2.jpg"]);
        assert_eq!(watcher.in_flight(), 2);
    }

    #[test]
    fn files_of_one_tick_come_out_oldest_first() {
        let (_dir, config, processed) = setup();
        for (name, secs) in [("c.jpg", 1_000), ("a.jpg", 2_000), ("b.jpg", 3_000)] {
            let path = config.directory.join(name);
            fs::write(&path, b"x").unwrap();
            filetime::set_file_mtime(&path, FileTime::from_unix_time(secs, 0)).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut watcher = DirectoryWatcher::new(&config, &processed, rx).unwrap();

        assert_eq!(names(&watcher.poll_once().unwrap()), vec!["c.jpg", "a.jpg", "b.jpg"]);
    }

    #[test]
    fn equal_timestamps_fall_back_to_the_name() {
        let at = |secs| FileTime::from_unix_time(secs, 0);
        let mut files = vec![
            (at(20), "Finish_2.jpg".to_string(), PathBuf::from("in/Finish_2.jpg")),
            (at(10), "photo9.jpg".to_string(), PathBuf::from("in/photo9.jpg")),
            (at(20), "Finish_1.jpg".to_string(), PathBuf::from("in/Finish_1.jpg")),
            (at(5), "z.jpg".to_string(), PathBuf::from("in/z.jpg")),
        ];

        sort_by_discovery(&mut files);

        let order: Vec<&str> = files.iter().map(|(_, name, _)| name.as_str()).collect();
        assert_eq!(order, vec!["z.jpg", "photo9.jpg", "Finish_1.jpg", "Finish_2.jpg"]);
    }

    #[test]
    fn processed_and_failed_files_are_skipped() {
        let (_dir, config, processed) = setup();
        processed
            .mark_uploaded(
                "photo1.jpg",
                &ProcessedSchema {
                    uploaded_at_ms: 0,
                    target_url: "http://host/photo".into(),
                    attempts: 1,
                    hash: String::new(),
                },
            )
            .unwrap();
        processed
            .mark_failed(
                "broken.jpg",
                &crate::database::FailedSchema {
                    failed_at_ms: 0,
                    stage: "Built".into(),
                    reason: "cannot decode".into(),
                },
            )
            .unwrap();
        for name in ["photo1.jpg", "broken.jpg", "photo2.jpg"] {
            fs::write(config.directory.join(name), b"x").unwrap();
        }
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut watcher = DirectoryWatcher::new(&config, &processed, rx).unwrap();

        assert_eq!(names(&watcher.poll_once().unwrap()), vec!["photo2.jpg"]);
    }

    #[test]
    fn completions_release_or_retire_names() {
        let (_dir, config, processed) = setup();
        fs::write(config.directory.join("done.jpg"), b"x").unwrap();
        fs::write(config.directory.join("stopped.jpg"), b"x").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = DirectoryWatcher::new(&config, &processed, rx).unwrap();
        assert_eq!(watcher.poll_once().unwrap().len(), 2);

        tx.send(Completion {
            name: "done.jpg".into(),
            kind: CompletionKind::Uploaded,
        })
        .unwrap();
        tx.send(Completion {
            name: "stopped.jpg".into(),
            kind: CompletionKind::Deferred,
        })
        .unwrap();
        watcher.drain_completions();

        assert_eq!(watcher.in_flight(), 0);
        assert_eq!(names(&watcher.poll_once().unwrap()), vec!["stopped.jpg"]);
    }

    #[test]
    fn young_files_wait_for_the_next_tick() {
        let (_dir, mut config, processed) = setup();
        config.min_file_age_ms = 60_000;
        fs::write(config.directory.join("photo1.jpg"), b"a").unwrap();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut watcher = DirectoryWatcher::new(&config, &processed, rx).unwrap();

        assert!(watcher.poll_once().unwrap().is_empty());
        assert_eq!(watcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn loop_action_stops_the_watcher() {
        let (_dir, config, processed) = setup();
        fs::write(config.directory.join("photo1.jpg"), b"a").unwrap();
        let (_tx, rx) = mpsc::unbounded_channel();
        let watcher = DirectoryWatcher::new(&config, &processed, rx).unwrap();
        let (dispatch, mut received) = mpsc::channel(4);
        let shutdown = Shutdown::new();

        let mut reports = Vec::new();
        let (report_tx, report_rx) = std::sync::mpsc::channel();
        let action: LoopAction = Box::new(move |report| {
            report_tx.send(*report).unwrap();
            if report.tick >= 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        let ticks = watcher.run(dispatch, shutdown.signal(), Some(action)).await;
        reports.extend(report_rx.try_iter());

        assert_eq!(ticks, 3);
        assert_eq!(reports[0].emitted, 1);
        assert!(reports[1..].iter().all(|r| r.emitted == 0 && r.in_flight == 1));
        assert_eq!(received.recv().await.unwrap().name, "photo1.jpg");
        assert!(received.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_the_watcher() {
        let (_dir, config, processed) = setup();
        let (_tx, rx) = mpsc::unbounded_channel();
        let watcher = DirectoryWatcher::new(&config, &processed, rx).unwrap();
        let (dispatch, _received) = mpsc::channel(1);
        let shutdown = Shutdown::new();
        shutdown.trigger();

        assert_eq!(watcher.run(dispatch, shutdown.signal(), None).await, 0);
    }
}
