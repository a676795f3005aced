//! Session naming.
//!
//! A session is one live process registered in the shared `sessions/`
//! directory. Its file is named `<hostname>.<epoch_ms>.session`.

use std::fmt;
use std::str::FromStr;

/// File suffix of session presence markers.
pub const SESSION_SUFFIX: &str = ".session";

/// Name of one session's presence file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionName {
    host: String,
    started_ms: u64,
}

impl SessionName {
    #[must_use]
    pub fn new(host: impl Into<String>, started_ms: u64) -> Self {
        Self {
            host: host.into(),
            started_ms,
        }
    }

    /// Host the session runs on.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn started_ms(&self) -> u64 {
        self.started_ms
    }

    /// Same host, next millisecond. Used when the file name is already taken.
    #[must_use]
    pub fn bump(&self) -> Self {
        Self::new(self.host.clone(), self.started_ms + 1)
    }

    /// File name inside the `sessions/` directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{SESSION_SUFFIX}", self.host, self.started_ms)
    }
}

impl FromStr for SessionName {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || crate::Error::InvalidSession(s.to_string());
        let stem = s.strip_suffix(SESSION_SUFFIX).ok_or_else(invalid)?;
        // hostnames may contain dots, the timestamp never does
        let (host, millis) = stem.rsplit_once('.').ok_or_else(invalid)?;
        if host.is_empty() || millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let started_ms = millis.parse().map_err(|_| invalid())?;
        Ok(Self::new(host, started_ms))
    }
}
