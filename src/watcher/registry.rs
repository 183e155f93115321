//! In-memory table of active (source, derived) associations.
//!
//! The registry owns the underlying `notify` watcher. Each entry holds the
//! watched source's directory and file name; OS watches are directory-scoped
//! and non-recursive, with one watch per distinct directory (reference
//! counted). A watch survives the source file not existing yet, and survives
//! the delete-then-recreate dance editors perform on atomic saves.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::error::WatchError;
use crate::paths;

/// Receiver side of the raw notification channel, consumed by the run loop.
pub type EventReceiver = mpsc::Receiver<notify::Result<Event>>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Identifier of one registered association, unique for the registry's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One monitored dependency: a source file and the opaque ref of the derived
/// artifact that must be rematerialized when it changes.
#[derive(Debug, Clone)]
pub struct WatchEntry<R> {
    pub id: WatchId,
    /// Absolute, normalized path of the watched file. Immutable once created.
    pub source_path: PathBuf,
    /// Directory the OS watch is scoped to.
    pub source_dir: PathBuf,
    /// File name filter within `source_dir`. Never empty.
    pub source_name: OsString,
    /// Opaque handle passed back to the materializer on trigger.
    pub derived_ref: R,
}

struct Inner<R> {
    /// `None` after `close()`.
    watcher: Option<RecommendedWatcher>,
    /// Insertion-ordered; duplicate source paths are permitted (several
    /// derived artifacts may depend on one source).
    entries: Vec<WatchEntry<R>>,
    /// Directory -> number of entries watching it.
    watched_dirs: HashMap<PathBuf, usize>,
    next_id: u64,
}

/// Lock-protected registry of watch entries.
///
/// All reads and writes share one mutex; entries are few and operations
/// infrequent. Nothing slow runs under the lock — materialization happens
/// outside, in the dispatcher.
pub struct WatchRegistry<R> {
    inner: Mutex<Inner<R>>,
}

impl<R: Clone + PartialEq> WatchRegistry<R> {
    /// Create the registry and its OS watcher.
    ///
    /// Notifications arrive on the watcher's own threads and are forwarded
    /// over the returned channel into the service's run loop.
    pub fn open() -> Result<(Self, EventReceiver), WatchError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Run loop gone means shutdown; drop the event
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| WatchError::InitFailed {
            reason: e.to_string(),
        })?;

        let registry = Self {
            inner: Mutex::new(Inner {
                watcher: Some(watcher),
                entries: Vec::new(),
                watched_dirs: HashMap::new(),
                next_id: 0,
            }),
        };
        Ok((registry, rx))
    }

    /// Register a new association and activate its OS watch.
    ///
    /// The source file itself need not exist; its containing directory must.
    /// On failure nothing is recorded.
    pub fn register(&self, source_path: &Path, derived_ref: R) -> Result<WatchId, WatchError> {
        let source_path = paths::normalize(source_path)?;
        let source_name = source_path
            .file_name()
            .ok_or_else(|| WatchError::WatchCreation {
                path: source_path.clone(),
                reason: "path has no file name".to_string(),
            })?
            .to_os_string();
        let source_dir = source_path
            .parent()
            .expect("normalized path with a file name has a parent")
            .to_path_buf();

        let mut inner = self.inner.lock();
        let Inner {
            watcher,
            entries,
            watched_dirs,
            next_id,
        } = &mut *inner;
        let watcher = watcher.as_mut().ok_or(WatchError::Closed)?;

        if watched_dirs.get(&source_dir).copied().unwrap_or(0) == 0 {
            watcher
                .watch(&source_dir, RecursiveMode::NonRecursive)
                .map_err(|e| WatchError::WatchCreation {
                    path: source_dir.clone(),
                    reason: e.to_string(),
                })?;
        }
        *watched_dirs.entry(source_dir.clone()).or_insert(0) += 1;

        let id = WatchId(*next_id);
        *next_id += 1;
        crate::debug_event!("registry", "watching", "{}", source_path.display());
        entries.push(WatchEntry {
            id,
            source_path,
            source_dir,
            source_name,
            derived_ref,
        });
        Ok(id)
    }

    /// Remove an entry, releasing its OS watch when it was the last entry
    /// scoped to that directory.
    pub fn deregister(&self, id: WatchId) -> Result<(), WatchError> {
        let mut inner = self.inner.lock();
        let Inner {
            watcher,
            entries,
            watched_dirs,
            ..
        } = &mut *inner;

        let position = entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(WatchError::UnknownEntry(id))?;
        let entry = entries.remove(position);

        if let Some(count) = watched_dirs.get_mut(&entry.source_dir) {
            *count -= 1;
            if *count == 0 {
                watched_dirs.remove(&entry.source_dir);
                if let Some(watcher) = watcher.as_mut() {
                    if let Err(e) = watcher.unwatch(&entry.source_dir) {
                        tracing::debug!(
                            "[registry] unwatch {} failed: {e}",
                            entry.source_dir.display()
                        );
                    }
                }
            }
        }
        crate::debug_event!("registry", "removed", "{}", entry.source_path.display());
        Ok(())
    }

    /// Derived refs of every entry matching the event's directory AND file
    /// name, deduplicated, in insertion order.
    ///
    /// File names compare under the host filesystem's case policy; the
    /// directory must match too, so an identically named file in another
    /// directory never triggers.
    pub fn matching(&self, dir: &Path, file_name: &OsStr) -> Vec<R> {
        let Ok(dir) = paths::normalize(dir) else {
            return Vec::new();
        };

        let inner = self.inner.lock();
        let mut refs: Vec<R> = Vec::new();
        for entry in &inner.entries {
            if entry.source_dir == dir
                && names_match(&entry.source_name, file_name)
                && !refs.contains(&entry.derived_ref)
            {
                refs.push(entry.derived_ref.clone());
            }
        }
        refs
    }

    /// Snapshot of all entries, in insertion order.
    pub fn entries(&self) -> Vec<WatchEntry<R>> {
        self.inner.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop every entry and the OS watcher. Closing the watcher closes the
    /// event channel, which ends the service's run loop.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.watched_dirs.clear();
        inner.watcher = None;
    }
}

/// File-name comparison under the host filesystem's case policy.
#[cfg(any(target_os = "windows", target_os = "macos"))]
fn names_match(a: &OsStr, b: &OsStr) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn names_match(a: &OsStr, b: &OsStr) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_registry() -> (WatchRegistry<String>, EventReceiver) {
        WatchRegistry::open().unwrap()
    }

    #[test]
    fn register_succeeds_without_the_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _rx) = open_registry();

        // in.json does not exist; only the directory does
        let id = registry
            .register(&dir.path().join("in.json"), "out.tt".to_string())
            .unwrap();

        let entries = registry.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].source_name, OsString::from("in.json"));
    }

    #[test]
    fn register_fails_when_directory_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _rx) = open_registry();

        let err = registry
            .register(&dir.path().join("no-such-dir/in.json"), "out.tt".to_string())
            .unwrap_err();
        assert!(matches!(err, WatchError::WatchCreation { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn matching_requires_directory_and_name() {
        let proj = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let (registry, _rx) = open_registry();

        registry
            .register(&proj.path().join("in.json"), "proj-out".to_string())
            .unwrap();
        registry
            .register(&other.path().join("in.json"), "other-out".to_string())
            .unwrap();

        // Same file name, different directory: only the matching entry fires
        let refs = registry.matching(proj.path(), OsStr::new("in.json"));
        assert_eq!(refs, vec!["proj-out".to_string()]);

        let refs = registry.matching(other.path(), OsStr::new("in.json"));
        assert_eq!(refs, vec!["other-out".to_string()]);

        assert!(
            registry
                .matching(proj.path(), OsStr::new("unrelated.json"))
                .is_empty()
        );
    }

    #[test]
    fn duplicate_sources_trigger_each_derived_ref() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _rx) = open_registry();
        let source = dir.path().join("in.json");

        registry.register(&source, "first.tt".to_string()).unwrap();
        registry.register(&source, "second.tt".to_string()).unwrap();
        // Same ref twice: deduplicated on match
        registry.register(&source, "first.tt".to_string()).unwrap();

        let refs = registry.matching(dir.path(), OsStr::new("in.json"));
        assert_eq!(refs, vec!["first.tt".to_string(), "second.tt".to_string()]);
    }

    #[test]
    fn deregister_removes_entry_and_stops_matching() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _rx) = open_registry();

        let id = registry
            .register(&dir.path().join("in.json"), "out.tt".to_string())
            .unwrap();
        registry.deregister(id).unwrap();

        assert!(registry.is_empty());
        assert!(
            registry
                .matching(dir.path(), OsStr::new("in.json"))
                .is_empty()
        );
        assert!(matches!(
            registry.deregister(id),
            Err(WatchError::UnknownEntry(_))
        ));
    }

    #[test]
    fn deregister_keeps_shared_directory_watch_alive() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _rx) = open_registry();

        let first = registry
            .register(&dir.path().join("a.json"), "a.tt".to_string())
            .unwrap();
        registry
            .register(&dir.path().join("b.json"), "b.tt".to_string())
            .unwrap();

        registry.deregister(first).unwrap();

        // The remaining entry still matches; its directory watch was shared
        let refs = registry.matching(dir.path(), OsStr::new("b.json"));
        assert_eq!(refs, vec!["b.tt".to_string()]);
    }

    #[test]
    fn closed_registry_rejects_registration() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _rx) = open_registry();
        registry.close();

        let err = registry
            .register(&dir.path().join("in.json"), "out.tt".to_string())
            .unwrap_err();
        assert!(matches!(err, WatchError::Closed));
    }
}
