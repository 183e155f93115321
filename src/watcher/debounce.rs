//! Debouncing of settled-file events.
//!
//! Some editors fire several rename/create notifications for one logical
//! save. A path is only dispatched once it has been quiet for the configured
//! duration; a new event for the same path resets its timer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Holds recently changed paths until they have been stable long enough.
#[derive(Debug)]
pub struct Debouncer {
    pending: HashMap<PathBuf, Instant>,
    quiet_period: Duration,
}

impl Debouncer {
    pub fn new(quiet_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            quiet_period: Duration::from_millis(quiet_ms),
        }
    }

    /// Record a settled-file event, resetting the path's quiet timer.
    pub fn record(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now());
    }

    /// Drop a pending path (the file was removed before it went quiet).
    pub fn forget(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Take every path that has been quiet for the full period.
    pub fn take_settled(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut settled = Vec::new();
        self.pending.retain(|path, last_event| {
            if now.duration_since(*last_event) >= self.quiet_period {
                settled.push(path.clone());
                false
            } else {
                true
            }
        });
        settled
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn path_is_held_until_quiet() {
        let mut debouncer = Debouncer::new(40);
        debouncer.record(PathBuf::from("/proj/in.json"));

        assert!(debouncer.take_settled().is_empty());
        assert!(!debouncer.is_empty());

        sleep(Duration::from_millis(50));
        let settled = debouncer.take_settled();
        assert_eq!(settled, vec![PathBuf::from("/proj/in.json")]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn new_event_resets_the_timer() {
        let mut debouncer = Debouncer::new(40);
        let path = PathBuf::from("/proj/in.json");

        debouncer.record(path.clone());
        sleep(Duration::from_millis(25));
        debouncer.record(path.clone());
        sleep(Duration::from_millis(25));

        // 50ms since the first event but only 25ms since the second
        assert!(debouncer.take_settled().is_empty());

        sleep(Duration::from_millis(25));
        assert_eq!(debouncer.take_settled(), vec![path]);
    }

    #[test]
    fn forget_clears_a_pending_path() {
        let mut debouncer = Debouncer::new(40);
        let path = PathBuf::from("/proj/in.json");

        debouncer.record(path.clone());
        debouncer.forget(&path);

        sleep(Duration::from_millis(50));
        assert!(debouncer.take_settled().is_empty());
    }

    #[test]
    fn paths_settle_independently() {
        let mut debouncer = Debouncer::new(40);
        let first = PathBuf::from("/proj/a.json");
        let second = PathBuf::from("/proj/b.json");

        debouncer.record(first.clone());
        sleep(Duration::from_millis(30));
        debouncer.record(second.clone());
        sleep(Duration::from_millis(15));

        assert_eq!(debouncer.take_settled(), vec![first]);
        assert!(!debouncer.is_empty());

        sleep(Duration::from_millis(30));
        assert_eq!(debouncer.take_settled(), vec![second]);
    }
}
