//! Error types for the lock layer.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Fatal lock-layer failures.
///
/// Contention is never an error: busy ids simply do not show up in the
/// returned lists. Only filesystem failures on the shared directories and
/// the counter surface here.
#[derive(Debug, Error)]
pub enum LockError {
    /// Filesystem error on a shared lock path.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The counter lock could not be taken in time.
    #[error("could not acquire the id counter lock within {0:?}")]
    CounterTimeout(Duration),

    /// The session was already shut down.
    #[error("session has been shut down")]
    ShutDown,
}

impl LockError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
