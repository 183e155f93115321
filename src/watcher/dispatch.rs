//! Dispatches matched change events to the materializer.
//!
//! Materialization can be slow (it opens and saves a file), so it runs in a
//! spawned task, never under the registry lock. Per derived ref there is at
//! most one materialization in flight; events arriving while one runs are
//! coalesced into a single rerun flag, so the final on-disk content is
//! deterministic and the queue never grows.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::materializer::Materializer;

/// Ref -> "rerun once this run finishes" flag. Presence means in flight.
type InFlight<R> = Arc<Mutex<HashMap<R, bool>>>;

/// Routes derived refs to the materializer with per-ref serialization.
pub struct ChangeDispatcher<R> {
    materializer: Arc<dyn Materializer<R>>,
    in_flight: InFlight<R>,
}

impl<R> ChangeDispatcher<R>
where
    R: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(materializer: Arc<dyn Materializer<R>>) -> Self {
        Self {
            materializer,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Trigger materialization of one derived ref.
    ///
    /// Starts a task if none is running for this ref; otherwise marks the
    /// running one for a single follow-up. Never blocks on the
    /// materialization itself.
    pub fn dispatch(&self, derived: R) {
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(rerun) = in_flight.get_mut(&derived) {
                *rerun = true;
                crate::debug_event!("dispatch", "coalesced", "{:?}", derived);
                return;
            }
            in_flight.insert(derived.clone(), false);
        }

        let materializer = Arc::clone(&self.materializer);
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(drive(materializer, in_flight, derived));
    }

    /// Number of refs currently being materialized.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Run materializations for one ref until no rerun is pending.
async fn drive<R>(materializer: Arc<dyn Materializer<R>>, in_flight: InFlight<R>, derived: R)
where
    R: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    loop {
        match materializer.materialize(&derived).await {
            Ok(()) => {
                crate::log_event!("dispatch", "materialized", "{:?}", derived);
            }
            Err(e) => {
                // The watch stays registered; a failed run never disables
                // future triggers
                tracing::warn!("[dispatch] materialization of {derived:?} failed: {e}");
            }
        }

        let mut guard = in_flight.lock();
        let rerun_pending = guard.get(&derived).copied().unwrap_or(false);
        if rerun_pending {
            guard.insert(derived.clone(), false);
            // Guard drops at the end of this iteration, before the next
            // materialization
        } else {
            guard.remove(&derived);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::MaterializeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Counts calls and blocks each one until the test releases a permit.
    struct GatedMaterializer {
        calls: AtomicUsize,
        gate: Semaphore,
        fail: bool,
    }

    impl GatedMaterializer {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(0),
                fail,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Materializer<String> for GatedMaterializer {
        async fn materialize(&self, _derived: &String) -> Result<(), MaterializeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.expect("gate closed").forget();
            if self.fail {
                Err(MaterializeError::Failed {
                    reason: "artifact locked".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached within 5s");
    }

    #[tokio::test]
    async fn rapid_events_coalesce_into_one_followup() {
        let materializer = Arc::new(GatedMaterializer::new(false));
        let dispatcher: ChangeDispatcher<String> = ChangeDispatcher::new(materializer.clone());

        dispatcher.dispatch("out.tt".to_string());
        wait_until(|| materializer.calls() == 1).await;

        // Three more events while the first run is blocked in flight
        dispatcher.dispatch("out.tt".to_string());
        dispatcher.dispatch("out.tt".to_string());
        dispatcher.dispatch("out.tt".to_string());
        assert_eq!(dispatcher.in_flight_count(), 1);

        materializer.gate.add_permits(8);
        wait_until(|| dispatcher.in_flight_count() == 0).await;

        // First run plus exactly one coalesced follow-up
        assert_eq!(materializer.calls(), 2);
    }

    #[tokio::test]
    async fn distinct_refs_run_independently() {
        let materializer = Arc::new(GatedMaterializer::new(false));
        let dispatcher: ChangeDispatcher<String> = ChangeDispatcher::new(materializer.clone());

        dispatcher.dispatch("a.tt".to_string());
        dispatcher.dispatch("b.tt".to_string());
        wait_until(|| materializer.calls() == 2).await;
        assert_eq!(dispatcher.in_flight_count(), 2);

        materializer.gate.add_permits(4);
        wait_until(|| dispatcher.in_flight_count() == 0).await;
        assert_eq!(materializer.calls(), 2);
    }

    #[tokio::test]
    async fn failure_releases_the_slot_and_keeps_triggering() {
        let materializer = Arc::new(GatedMaterializer::new(true));
        let dispatcher: ChangeDispatcher<String> = ChangeDispatcher::new(materializer.clone());

        dispatcher.dispatch("out.tt".to_string());
        materializer.gate.add_permits(1);
        wait_until(|| dispatcher.in_flight_count() == 0).await;
        assert_eq!(materializer.calls(), 1);

        // A later event still triggers despite the earlier failure
        dispatcher.dispatch("out.tt".to_string());
        materializer.gate.add_permits(1);
        wait_until(|| dispatcher.in_flight_count() == 0).await;
        assert_eq!(materializer.calls(), 2);
    }

    #[tokio::test]
    async fn pending_rerun_still_runs_after_a_failure() {
        let materializer = Arc::new(GatedMaterializer::new(true));
        let dispatcher: ChangeDispatcher<String> = ChangeDispatcher::new(materializer.clone());

        dispatcher.dispatch("out.tt".to_string());
        wait_until(|| materializer.calls() == 1).await;
        dispatcher.dispatch("out.tt".to_string());

        materializer.gate.add_permits(4);
        wait_until(|| dispatcher.in_flight_count() == 0).await;
        assert_eq!(materializer.calls(), 2);
    }
}
