//! Watch registry, change dispatch, and the service façade.
//!
//! # Architecture
//!
//! ```text
//! WatcherService (façade)
//!   - register_new(): WatchRegistry first, ManifestStore second
//!   - restore_all(): manifest -> live watches
//!   - run(): notify events -> classify -> debounce -> match -> dispatch
//!         |
//!    +----------+-----------+
//!    |          |           |
//! WatchRegistry Debouncer ChangeDispatcher -> Materializer
//! ```

mod debounce;
mod dispatch;
mod error;
pub mod events;
mod registry;
mod service;

pub use debounce::Debouncer;
pub use dispatch::ChangeDispatcher;
pub use error::WatchError;
pub use registry::{EventReceiver, WatchEntry, WatchId, WatchRegistry};
pub use service::{RestoreReport, WatchEvents, WatcherService};
