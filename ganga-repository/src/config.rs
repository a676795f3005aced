//! Repository configuration.

use crate::layout::VERSION_DIR;
use crate::RepositoryResult;
use ganga_lock::LockConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of one registry and its on-disk repository.
///
/// Durations are written as integer milliseconds:
///
/// ```toml
/// location = "/home/user/gangadir/repository/user/LocalXML"
/// name = "jobs"
/// session_timeout = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Directory holding the versioned repository tree.
    pub location: PathBuf,
    /// Registry name, also the directory below `<location>/6.0`.
    pub name: String,
    /// Sequence attribute whose elements are stored as separate files.
    pub sub_split: Option<String>,
    /// File name of an object body inside its directory.
    pub data_file_name: String,
    /// A session not heard from for this long is considered dead.
    #[serde(with = "millis")]
    pub session_timeout: Duration,
    /// How often this session refreshes its presence file.
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    /// Minimum age of `master.idx` before it is rewritten outside shutdown.
    #[serde(with = "millis")]
    pub master_index_interval: Duration,
    /// Sleep between attempts to take a busy lock.
    #[serde(with = "millis")]
    pub lock_poll_interval: Duration,
    /// How long a write waits for another session to release an object.
    #[serde(with = "millis")]
    pub write_access_timeout: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            location: PathBuf::from("repository"),
            name: "jobs".to_string(),
            sub_split: Some("subjobs".to_string()),
            data_file_name: "data".to_string(),
            session_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            master_index_interval: Duration::from_secs(300),
            lock_poll_interval: Duration::from_millis(100),
            write_access_timeout: Duration::from_secs(7),
        }
    }
}

impl RepositoryConfig {
    /// Default settings for registry `name` under `location`.
    #[must_use]
    pub fn new(location: impl AsRef<Path>, name: &str) -> Self {
        Self {
            location: location.as_ref().to_path_buf(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Parses a TOML fragment; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> RepositoryResult<Self> {
        Ok(toml::from_str(text)?)
    }

    #[must_use]
    pub fn with_sub_split(mut self, attribute: Option<&str>) -> Self {
        self.sub_split = attribute.map(str::to_string);
        self
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
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_write_access_timeout(mut self, timeout: Duration) -> Self {
        self.write_access_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_master_index_interval(mut self, interval: Duration) -> Self {
        self.master_index_interval = interval;
        self
    }

    /// Root shared by every registry at this location (`<location>/6.0`).
    #[must_use]
    pub fn shared_root(&self) -> PathBuf {
        self.location.join(VERSION_DIR)
    }

    /// Lock settings for the shared root.
    #[must_use]
    pub fn lock_config(&self) -> LockConfig {
        LockConfig::new(self.shared_root())
            .with_session_timeout(self.session_timeout)
            .with_heartbeat_interval(self.heartbeat_interval)
            .with_poll_interval(self.lock_poll_interval)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
