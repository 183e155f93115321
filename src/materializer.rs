//! The materializer seam: the host-supplied capability that regenerates a
//! derived artifact when its source changes.
//!
//! The watcher never interprets a derived ref; it only hands it back here.
//! Implementations must be idempotent: materializing an already up-to-date
//! artifact is a no-op, not an error.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a materialization attempt.
///
/// A failure is reported and the watch stays registered; it never disables
/// future triggers for the same ref.
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("I/O error while materializing artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("materialization failed: {reason}")]
    Failed { reason: String },
}

/// Regenerates/re-saves a derived artifact identified by an opaque ref.
#[async_trait]
pub trait Materializer<R>: Send + Sync {
    async fn materialize(&self, derived: &R) -> Result<(), MaterializeError>;
}

/// File-backed materializer used by the CLI: re-saves the derived file in
/// place (read, then write back), bumping its timestamp so downstream
/// tooling picks up the change.
pub struct FileMaterializer;

#[async_trait]
impl Materializer<std::path::PathBuf> for FileMaterializer {
    async fn materialize(&self, derived: &std::path::PathBuf) -> Result<(), MaterializeError> {
        let contents = tokio::fs::read(derived).await?;
        tokio::fs::write(derived, contents).await?;
        crate::debug_event!("materialize", "re-saved", "{}", derived.display());
        Ok(())
    }
}
