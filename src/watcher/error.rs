//! Error types for the watcher system.

use std::path::PathBuf;
use thiserror::Error;

use super::WatchHandle;

/// Errors from watcher operations.
///
/// Only `SourceInit`, `SourceRead`, `RootUnreadable` and `Config` are fatal;
/// everything else is absorbed by the dispatcher and logged.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Cannot watch {path}: {reason}")]
    WatchCreation { path: PathBuf, reason: String },

    #[error("No live watch for handle {handle}")]
    UnknownHandle { handle: WatchHandle },

    #[error("Corrupt event buffer at offset {offset}: {details}")]
    EventCorruption { offset: usize, details: String },

    #[error("Failed to initialize notification source: {reason}")]
    SourceInit { reason: String },

    #[error("Failed to read notifications: {reason}")]
    SourceRead { reason: String },

    #[error("Cannot read root directory {path}: {reason}")]
    RootUnreadable { path: PathBuf, reason: String },

    #[error("Failed to load config: {reason}")]
    Config { reason: String },
}

impl WatchError {
    /// Whether the error should stop the process rather than be logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WatchError::SourceInit { .. }
                | WatchError::SourceRead { .. }
                | WatchError::RootUnreadable { .. }
                | WatchError::Config { .. }
        )
    }
}

impl From<figment::Error> for WatchError {
    fn from(e: figment::Error) -> Self {
        WatchError::Config {
            reason: e.to_string(),
        }
    }
}
