//! Dependency-propagation watcher: watch a source file, re-save its derived
//! artifact on change.
//!
//! The crate tracks any number of (source, derived) associations, persists
//! them across restarts in a root-relative manifest, and turns filesystem
//! notifications into calls to a host-supplied [`Materializer`]. What
//! "regenerate" means for a derived artifact is entirely the host's business;
//! the watcher only guarantees that the right ref is handed over, exactly
//! once per settled change.
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use rederive::{FileMaterializer, Settings, WatcherService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let root = PathBuf::from("/proj");
//! let settings = Settings::default();
//! let (service, events): (WatcherService<PathBuf>, _) =
//!     WatcherService::open(root.clone(), Arc::new(FileMaterializer), &settings)?;
//!
//! service.register_new(
//!     &root.join("in.json"),
//!     &root.join("out.tt"),
//!     root.join("out.tt"),
//! )?;
//! service.run(events).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod manifest;
pub mod materializer;
pub mod paths;
pub mod watcher;

pub use config::Settings;
pub use manifest::{ManifestError, ManifestRecord, ManifestStore};
pub use materializer::{FileMaterializer, MaterializeError, Materializer};
pub use paths::PathError;
pub use watcher::{
    ChangeDispatcher, RestoreReport, WatchEntry, WatchError, WatchEvents, WatchId, WatchRegistry,
    WatcherService,
};
