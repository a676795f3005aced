//! Error types for repositories and registries.

use ganga_lock::LockError;
use ganga_schema::SchemaError;
use ganga_streamer::StreamError;
use ganga_types::{ObjectId, SessionName};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors raised by repositories and the registry.
///
/// Per-object failures carry the offending id so that bulk operations can
/// report them without giving up on the rest of the repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The object has no data on disk (or was never added).
    #[error("object #{0} not found")]
    NotFound(ObjectId),

    /// Filesystem error while reading or writing one object.
    #[error("I/O error on object #{id} at '{}': {source}", path.display())]
    Io {
        id: ObjectId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem error on the repository tree itself.
    #[error("I/O error on '{}': {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored record of an object could not be parsed or written.
    #[error("record of object #{id} is unreadable: {source}")]
    Record {
        id: ObjectId,
        #[source]
        source: StreamError,
    },

    /// An index or master index file is not a valid record.
    #[error("corrupt index '{}': {message}", path.display())]
    IndexCorrupt { path: PathBuf, message: String },

    /// The stored class of an object is not registered.
    #[error("object #{id}: {source}")]
    Plugin {
        id: ObjectId,
        #[source]
        source: SchemaError,
    },

    /// Loading failed, the backup copy included.
    #[error("object #{id} is inaccessible: {source}")]
    Inaccessible {
        id: ObjectId,
        #[source]
        source: Box<RepositoryError>,
    },

    /// The object failed to load earlier in this session and is not retried.
    #[error("object #{0} is incomplete and will not be loaded again in this session")]
    Incomplete(ObjectId),

    /// Another session holds the write lock.
    #[error("could not lock object #{id}{}", holder.as_ref().map(|h| format!(", it is locked by session '{h}'")).unwrap_or_default())]
    Locked {
        id: ObjectId,
        holder: Option<SessionName>,
    },

    /// Placeholders for unreadable records are never written back.
    #[error("cannot flush the empty placeholder stored as object #{0}")]
    EmptyObject(ObjectId),

    /// Operation on a repository that is not started.
    #[error("repository '{0}' is not started")]
    NotStarted(String),

    /// Caller passed inconsistent arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lock layer failure.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Object model error.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl RepositoryError {
    /// Short name of the failure class, used to group bulk failure reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::Io { .. } | Self::Storage { .. } => "IoError",
            Self::Record { .. } => "RecordError",
            Self::IndexCorrupt { .. } => "IndexCorrupt",
            Self::Plugin { .. } => "PluginNotFound",
            Self::Inaccessible { .. } => "Inaccessible",
            Self::Incomplete(_) => "Incomplete",
            Self::Locked { .. } => "Locked",
            Self::EmptyObject(_) => "EmptyObject",
            Self::NotStarted(_) => "NotStarted",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Lock(_) => "LockError",
            Self::Schema(_) => "SchemaError",
            Self::Config(_) => "ConfigError",
        }
    }

    pub(crate) fn io(id: ObjectId, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            id,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}
