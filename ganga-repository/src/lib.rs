//! Persistence for Ganga object trees.
//!
//! - [`GangaRepository`]: the storage contract: add, load, flush, delete
//!   and per-id locking of root objects
//! - [`LocalRepository`]: one XML record per object on a shared
//!   filesystem, with index files, a master index and backup recovery
//! - [`TransientRepository`]: in-memory only
//! - [`Registry`]: owns a repository, serves lazy loads and write locks
//!   to the objects it hands out, and tracks what needs flushing
//!
//! Several processes may open the same [`LocalRepository`] at once; they
//! coordinate through the session locks of `ganga-lock`.

mod config;
mod error;
mod index;
mod layout;
mod local;
mod registry;
mod repository;
pub mod safe_io;
mod transient;

pub use config::RepositoryConfig;
pub use error::{RepositoryError, RepositoryResult};
pub use index::{
    AttributeIndex, IndexCacheProvider, IndexRecord, MasterEntry, MasterIndex, NoIndexCache,
    INDEX_FORMAT,
};
pub use layout::{
    backup_path, new_path, parse_bucket, parse_index_name, Layout, Slots, BUCKET_SUFFIX,
    INDEX_SUFFIX, MASTER_INDEX_NAME, VERSION_DIR,
};
pub use local::LocalRepository;
pub use registry::Registry;
pub use repository::{GangaRepository, ID_ATTRIBUTE};
pub use transient::TransientRepository;
