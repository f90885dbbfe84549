// ABOUTME: Library root for table-mirror
// ABOUTME: Exposes the checkpoint store, planner, reconciler, transfer engine and dispatcher

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filters;
pub mod planner;
pub mod preflight;
pub mod reconciler;
pub mod transfer;
pub mod utils;
pub mod watermark;

pub use checkpoint::CheckpointStore;
pub use config::{RunOptions, SyncConfig};
pub use dispatcher::{Outcome, OutcomeStatus, RunSummary, TableDispatcher};
pub use error::{Side, SyncError};
pub use watermark::Watermark;
