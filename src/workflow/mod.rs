pub mod capture;
pub mod controller;
pub mod flows;
pub mod processors;
pub mod types;
pub mod watcher;

pub use controller::{FileOutcome, PipelineController, RunSummary};
pub use flows::Monitor;
pub use watcher::{Completion, DirectoryWatcher, LoopAction, TickReport};
