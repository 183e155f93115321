//! Error types for the watch registry and service.

use std::path::PathBuf;
use thiserror::Error;

use super::registry::WatchId;
use crate::manifest::ManifestError;
use crate::paths::PathError;

/// Errors from watcher operations.
///
/// Failures are scoped to one registration or one event; the service degrades
/// per-entry, never globally.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    /// The OS watch could not be created (e.g., the source's directory does
    /// not exist). Fatal to this registration only.
    #[error("cannot watch {path}: {reason}")]
    WatchCreation { path: PathBuf, reason: String },

    #[error("no watch entry with id {0}")]
    UnknownEntry(WatchId),

    #[error("watch registry is closed")]
    Closed,

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}
