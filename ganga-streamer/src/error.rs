//! Error types for the streamer.

use ganga_schema::{SchemaError, Version};
use thiserror::Error;

/// Result type for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors raised while writing or reading a record.
///
/// `UnknownClass` and `SchemaVersion` are soft: the loader records them next
/// to a placeholder object and keeps going. Everything else aborts the parse.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Class not present in the plugin registry.
    #[error("unknown class '{name}' in category '{category}'")]
    UnknownClass { category: String, name: String },

    /// Stored schema version is incompatible with the registered class.
    #[error("incompatible schema of {name}: repository is {stored}, currently in use is {current}")]
    SchemaVersion {
        name: String,
        stored: Version,
        current: Version,
    },

    /// Malformed XML.
    #[error("XML error: {0}")]
    Xml(String),

    /// Well-formed XML with the wrong element structure.
    #[error("corrupt record: {0}")]
    Structure(String),

    /// A `<value>` payload outside the literal grammar.
    #[error("invalid literal {text:?}: {message}")]
    Literal { text: String, message: String },

    /// A required attribute is absent after defaults were applied.
    #[error("incomplete record: '{class}' is missing attribute '{attribute}'")]
    Incomplete { class: String, attribute: String },

    /// Object model error while rendering or rebuilding.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Whether the loader can contain this error to a single sub-object.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::UnknownClass { .. } | Self::SchemaVersion { .. })
    }
}
