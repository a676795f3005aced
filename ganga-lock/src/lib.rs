//! Cross-process coordination for Ganga repositories.
//!
//! Independent processes sharing one repository root cooperate through the
//! filesystem alone:
//! - a heartbeat-refreshed presence file per session
//! - one symlink per locked object id, pointing at the holder's presence file
//! - a shared `count` file allocating fresh ids under its own lock
//!
//! The repository only sees the [`IdLock`] trait; [`SessionLockManager`] is
//! the symlink implementation.

mod config;
mod error;
mod id_lock;
mod session;

pub use config::LockConfig;
pub use error::{LockError, LockResult};
pub use id_lock::IdLock;
pub use session::SessionLockManager;
