//! Core type definitions for the Ganga repository.
//!
//! This crate defines the small, dependency-free types shared by every
//! layer of the persistent object store:
//! - Object identifiers (dense non-negative integers)
//! - Repository bucket arithmetic for on-disk layout
//! - Session presence file names
//!
//! Schema, object and storage types live in their own crates.

mod ids;
mod session;

pub use ids::{ObjectId, BUCKET_SIZE};
pub use session::{SessionName, SESSION_SUFFIX};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid object id: {0:?}")]
    InvalidId(String),

    #[error("invalid session file name: {0:?}")]
    InvalidSession(String),
}
