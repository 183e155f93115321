//! The watcher façade: registration, restore, and the event loop.
//!
//! Composition follows the data flow: `register_new` creates the live watch
//! first and persists it second, rolling the watch back if persistence fails,
//! so the manifest and the registry never disagree. `restore_all` replays the
//! manifest at startup, skipping stale and corrupt records per entry. `run`
//! turns raw notifications into materializations: classify, debounce, match
//! against the registry (directory AND file name), dispatch.

use std::fmt::Debug;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::{Duration, sleep};

use super::debounce::Debouncer;
use super::dispatch::ChangeDispatcher;
use super::error::WatchError;
use super::events;
use super::registry::{EventReceiver, WatchId, WatchRegistry};
use crate::config::Settings;
use crate::manifest::{ManifestError, ManifestRecord, ManifestStore};
use crate::materializer::Materializer;
use crate::paths;

/// How often the run loop sweeps the debouncer for settled paths.
const DISPATCH_TICK_MS: u64 = 50;

/// Raw notification stream, handed to [`WatcherService::run`].
pub struct WatchEvents {
    rx: EventReceiver,
}

/// Outcome of [`WatcherService::restore_all`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    /// Records turned back into live watches.
    pub restored: usize,
    /// Stale or unresolvable records, skipped without error.
    pub skipped: usize,
    /// Lines dropped because they could not be parsed.
    pub corrupt: usize,
}

/// Façade over the registry, manifest, and dispatcher.
///
/// Cheap to clone; all clones share one registry. Lifecycle is explicit:
/// [`open`](Self::open) to create, [`close`](Self::close) to shut down (which
/// also ends a running event loop).
pub struct WatcherService<R> {
    root: PathBuf,
    registry: Arc<WatchRegistry<R>>,
    dispatcher: Arc<ChangeDispatcher<R>>,
    manifest: ManifestStore,
    debounce_ms: u64,
}

impl<R> Clone for WatcherService<R> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            manifest: self.manifest.clone(),
            debounce_ms: self.debounce_ms,
        }
    }
}

impl<R> WatcherService<R>
where
    R: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Open the service for a root directory.
    ///
    /// `root` anchors the manifest and all relative paths; it must be an
    /// absolute path. The returned [`WatchEvents`] must be passed to
    /// [`run`](Self::run) to drive dispatch.
    pub fn open(
        root: impl Into<PathBuf>,
        materializer: Arc<dyn Materializer<R>>,
        settings: &Settings,
    ) -> Result<(Self, WatchEvents), WatchError> {
        let root = paths::normalize(&root.into())?;
        let (registry, rx) = WatchRegistry::open()?;

        let service = Self {
            root,
            registry: Arc::new(registry),
            dispatcher: Arc::new(ChangeDispatcher::new(materializer)),
            manifest: ManifestStore::with_file_name(&settings.manifest_name),
            debounce_ms: settings.debounce_ms,
        };
        Ok((service, WatchEvents { rx }))
    }

    /// Register a new association and persist it.
    ///
    /// Both paths must be absolute and under the root. The live watch is
    /// created first; if the manifest append then fails, the watch is
    /// deregistered so no half-registered state survives.
    pub fn register_new(
        &self,
        source_abs: &Path,
        derived_abs: &Path,
        derived_ref: R,
    ) -> Result<WatchId, WatchError> {
        let relative_source = paths::to_relative(&self.root, source_abs)?;
        let relative_derived = paths::to_relative(&self.root, derived_abs)?;

        let id = self.registry.register(source_abs, derived_ref)?;
        if let Err(e) = self
            .manifest
            .append(&self.root, &relative_source, &relative_derived)
        {
            if let Err(rollback) = self.registry.deregister(id) {
                tracing::warn!("[service] watch rollback after failed persist failed: {rollback}");
            }
            return Err(e.into());
        }

        crate::log_event!(
            "service",
            "registered",
            "{} -> {}",
            relative_source.display(),
            relative_derived.display()
        );
        Ok(id)
    }

    /// Remove a live association.
    ///
    /// The manifest is append-only, so the record remains on disk; a later
    /// restore skips it once its files are gone.
    pub fn deregister(&self, id: WatchId) -> Result<(), WatchError> {
        self.registry.deregister(id)
    }

    /// Recreate live watches from the manifest.
    ///
    /// `resolve` maps a record's root-relative derived path back to the
    /// host's opaque ref. Records whose source or derived file no longer
    /// exists, or that `resolve` cannot map, are skipped silently; corrupt
    /// lines are logged and dropped. No per-record failure aborts the rest.
    pub fn restore_all(
        &self,
        resolve: impl Fn(&Path) -> Option<R>,
    ) -> Result<RestoreReport, WatchError> {
        let mut report = RestoreReport::default();

        let records = match self.manifest.load(&self.root) {
            Ok(records) => records,
            Err(ManifestError::Missing { .. }) => {
                crate::debug_event!("service", "no manifest, nothing to restore");
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        for record in records {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("[service] dropping manifest line: {e}");
                    report.corrupt += 1;
                    continue;
                }
            };
            match self.restore_one(&record, &resolve) {
                Ok(true) => report.restored += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        "[service] could not restore watch for {}: {e}",
                        record.source.display()
                    );
                    report.skipped += 1;
                }
            }
        }

        crate::log_event!(
            "service",
            "restored",
            "{} watches ({} skipped, {} corrupt)",
            report.restored,
            report.skipped,
            report.corrupt
        );
        Ok(report)
    }

    fn restore_one(
        &self,
        record: &ManifestRecord,
        resolve: &impl Fn(&Path) -> Option<R>,
    ) -> Result<bool, WatchError> {
        let source_abs = paths::to_absolute(&self.root, &record.source)?;
        let derived_abs = paths::to_absolute(&self.root, &record.derived)?;

        // Stale-manifest tolerance: a record whose files are gone is not an error
        if !source_abs.exists() || !derived_abs.exists() {
            crate::debug_event!("service", "stale record", "{}", record.source.display());
            return Ok(false);
        }

        let Some(derived_ref) = resolve(&record.derived) else {
            crate::debug_event!("service", "unresolved ref", "{}", record.derived.display());
            return Ok(false);
        };

        self.registry.register(&source_abs, derived_ref)?;
        Ok(true)
    }

    /// Drive the event loop until [`close`](Self::close) drops the watcher.
    ///
    /// Settled events are debounced per path, then matched and dispatched on
    /// a periodic tick. The registry lock is never held across a
    /// materialization.
    pub async fn run(&self, mut events: WatchEvents) -> Result<(), WatchError> {
        let mut debouncer = Debouncer::new(self.debounce_ms);
        crate::log_event!("service", "watching", "{} entries", self.registry.len());

        loop {
            let tick = sleep(Duration::from_millis(DISPATCH_TICK_MS));
            tokio::pin!(tick);

            tokio::select! {
                received = events.rx.recv() => {
                    match received {
                        Some(Ok(event)) => {
                            if events::is_removal(&event.kind) {
                                for path in &event.paths {
                                    debouncer.forget(path);
                                }
                            }
                            for path in events::settled_paths(&event) {
                                debouncer.record(path);
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!("[service] file watch error: {e}");
                        }
                        // Watcher dropped: the service was closed
                        None => break,
                    }
                }

                _ = &mut tick => {
                    for path in debouncer.take_settled() {
                        self.trigger(&path);
                    }
                }
            }
        }

        for path in debouncer.take_settled() {
            self.trigger(&path);
        }
        crate::log_event!("service", "stopped");
        Ok(())
    }

    /// Match one settled path against the registry and dispatch every
    /// matching derived ref.
    pub fn trigger(&self, path: &Path) {
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        let refs = self.registry.matching(dir, name);
        if refs.is_empty() {
            crate::debug_event!("service", "unmatched", "{}", path.display());
            return;
        }
        for derived in refs {
            self.dispatcher.dispatch(derived);
        }
    }

    /// The registry, for inspection.
    pub fn registry(&self) -> &WatchRegistry<R> {
        &self.registry
    }

    /// Number of materializations currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.dispatcher.in_flight_count()
    }

    /// The root directory the manifest is anchored to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shut down: drop all entries and the OS watcher. A running event loop
    /// observes the closed channel and returns.
    pub fn close(&self) {
        self.registry.close();
        crate::log_event!("service", "closed");
    }
}
