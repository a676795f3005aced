//! Index records and index-cache providers.
//!
//! Every object has a small `<id>.index` file next to its directory naming
//! its class and carrying an index cache: the few attribute values needed
//! to list the object without reading its body. `master.idx` snapshots all
//! index records at once so that startup does not have to open thousands
//! of files. Both are versioned JSON; cache values are stored as literals.

use crate::{RepositoryError, RepositoryResult};
use ganga_schema::{IndexCache, ObjectRef, Value};
use ganga_streamer::{parse_literal, to_literal};
use ganga_types::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Format generation of `.index` and `master.idx` files.
pub const INDEX_FORMAT: u32 = 1;

/// Contents of one `<id>.index` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub format: u32,
    pub category: String,
    pub name: String,
    /// Attribute name → literal.
    pub cache: BTreeMap<String, String>,
}

impl IndexRecord {
    /// Builds a record; values without a literal form are left out.
    #[must_use]
    pub fn new(category: &str, name: &str, cache: &IndexCache) -> Self {
        Self {
            format: INDEX_FORMAT,
            category: category.to_string(),
            name: name.to_string(),
            cache: cache
                .iter()
                .filter_map(|(k, v)| to_literal(v).map(|lit| (k.clone(), lit)))
                .collect(),
        }
    }

    /// Parses the cached literals back into values.
    pub fn decode_cache(&self) -> Result<IndexCache, String> {
        self.cache
            .iter()
            .map(|(k, lit)| {
                parse_literal(lit)
                    .map(|v| (k.clone(), v))
                    .map_err(|e| format!("attribute '{k}': {e}"))
            })
            .collect()
    }

    pub fn read(path: &Path) -> RepositoryResult<Self> {
        let bytes = fs::read(path).map_err(|e| RepositoryError::storage(path, e))?;
        let record: Self = serde_json::from_slice(&bytes).map_err(|e| corrupt(path, e))?;
        check_format(path, record.format)?;
        Ok(record)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// One entry of the master index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterEntry {
    pub id: ObjectId,
    /// Modification time of the `.index` file this entry was taken from.
    pub timestamp: SystemTime,
    pub record: IndexRecord,
}

/// Snapshot of every index record of a repository.
///
/// Only ever a cache: a missing, unreadable or stale master index is
/// ignored and the per-object index files are read instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterIndex {
    pub format: u32,
    pub entries: Vec<MasterEntry>,
}

impl MasterIndex {
    #[must_use]
    pub fn new(entries: Vec<MasterEntry>) -> Self {
        Self {
            format: INDEX_FORMAT,
            entries,
        }
    }

    pub fn read(path: &Path) -> RepositoryResult<Self> {
        let bytes = fs::read(path).map_err(|e| RepositoryError::storage(path, e))?;
        let master: Self = serde_json::from_slice(&bytes).map_err(|e| corrupt(path, e))?;
        check_format(path, master.format)?;
        Ok(master)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn corrupt(path: &Path, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::IndexCorrupt {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn check_format(path: &Path, format: u32) -> RepositoryResult<()> {
    if format == INDEX_FORMAT {
        Ok(())
    } else {
        Err(corrupt(
            path,
            format!("unsupported format {format}, expected {INDEX_FORMAT}"),
        ))
    }
}

/// Computes the index cache of a loaded root object.
pub trait IndexCacheProvider: Send + Sync {
    fn index_cache(&self, obj: &ObjectRef) -> IndexCache;
}

/// Keeps no summary; every listing needs the body.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndexCache;

impl IndexCacheProvider for NoIndexCache {
    fn index_cache(&self, _obj: &ObjectRef) -> IndexCache {
        IndexCache::new()
    }
}

/// Caches a fixed list of attributes.
///
/// Plain values are cached under their own name. A component is cached as
/// its class name under `display:<name>`, which never shadows the attribute
/// itself.
#[derive(Debug, Clone, Default)]
pub struct AttributeIndex {
    attributes: Vec<String>,
}

impl AttributeIndex {
    #[must_use]
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }
}

impl IndexCacheProvider for AttributeIndex {
    fn index_cache(&self, obj: &ObjectRef) -> IndexCache {
        let mut cache = IndexCache::new();
        for name in &self.attributes {
            match obj.raw_attribute(name) {
                Some(Value::Object(child)) => {
                    cache.insert(format!("display:{name}"), Value::Str(child.class_name()));
                }
                Some(value) if value.is_plain() => {
                    cache.insert(name.clone(), value);
                }
                _ => {}
            }
        }
        cache
    }
}
