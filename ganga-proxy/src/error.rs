//! Error types for the proxy layer.

use ganga_schema::SchemaError;
use thiserror::Error;

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProxyError {
    /// Not part of the user-visible namespace (undeclared or hidden).
    #[error("'{class}' object has no attribute '{name}'")]
    UnknownAttribute { class: String, name: String },

    /// Declared, but not writable from user code.
    #[error("attribute '{name}' of '{class}' is protected")]
    ProtectedAttribute { class: String, name: String },

    /// Rejected by the object model.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
