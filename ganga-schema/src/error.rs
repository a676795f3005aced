//! Error types for the object model.

use crate::ValueType;
use thiserror::Error;

/// Result type for schema and object operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised by attribute access, validation and plugin lookup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// The schema does not declare the attribute.
    #[error("'{class}' object has no attribute '{name}'")]
    UnknownAttribute { class: String, name: String },

    /// The value type is not in the item's allowed type list.
    #[error("attribute '{attribute}' expects {expected}, got {found}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        found: ValueType,
    },

    /// `None` assigned to an item that is not optional.
    #[error("attribute '{0}' may not be None")]
    NoneNotAllowed(String),

    /// Component of the wrong plugin category.
    #[error("attribute '{attribute}' expects a component of category '{expected}', got '{found}'")]
    CategoryMismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    /// Scalar assigned to a strict sequence.
    #[error("attribute '{0}' is a strict sequence and only accepts lists")]
    StrictSequence(String),

    /// Write attempted on a read-only object.
    #[error("'{class}' object is read-only, attribute '{attribute}' cannot be changed")]
    ReadOnly { class: String, attribute: String },

    /// `copy_from` between different classes.
    #[error("cannot copy '{found}' into '{expected}'")]
    ClassMismatch { expected: String, found: String },

    /// No plugin registered for the category/name pair.
    #[error("plugin '{name}' not found in category '{category}'")]
    PluginNotFound { category: String, name: String },

    /// Body of a lazily loaded object is unavailable.
    #[error("body of '{0}' object is not loaded")]
    NotLoaded(String),

    /// Checkset or filter hook rejected the value.
    #[error("attribute '{attribute}' rejected: {message}")]
    Hook { attribute: String, message: String },

    /// Owning registry refused read or write access.
    #[error("registry access failed: {0}")]
    RegistryAccess(String),
}
