use std::path::{Path, PathBuf};
use std::time::Duration;

/// Session and lock timing for one shared repository root.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Versioned repository root (`<location>/6.0`); `sessions/`, `locks/`
    /// and `count` live directly below it.
    pub root: PathBuf,
    /// A session file not touched for this long belongs to a dead session.
    pub session_timeout: Duration,
    /// How often the heartbeat touches the session file. Zero disables it.
    pub heartbeat_interval: Duration,
    /// Sleep between attempts on the counter lock.
    pub poll_interval: Duration,
    /// Give up on the counter lock after this long.
    pub counter_timeout: Duration,
}

impl LockConfig {
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            session_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            counter_timeout: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_counter_timeout(mut self, timeout: Duration) -> Self {
        self.counter_timeout = timeout;
        self
    }

    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    #[must_use]
    pub fn count_path(&self) -> PathBuf {
        self.root.join("count")
    }
}
