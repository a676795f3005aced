//! Paths inside a repository tree.
//!
//! ```text
//! <location>/6.0/<name>/<id / 1000>xxx/<id>/data        object body
//! <location>/6.0/<name>/<id / 1000>xxx/<id>/<n>/data    sub-split child n
//! <location>/6.0/<name>/<id / 1000>xxx/<id>.index       index record
//! <location>/6.0/<name>/master.idx                      master index
//! ```

use crate::safe_io::is_numeric;
use ganga_types::ObjectId;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Format generation of the tree; part of every path.
pub const VERSION_DIR: &str = "6.0";

/// Suffix of bucket directories.
pub const BUCKET_SUFFIX: &str = "xxx";

/// Suffix of per-object index files.
pub const INDEX_SUFFIX: &str = ".index";

pub const MASTER_INDEX_NAME: &str = "master.idx";

/// What a listing of the tree found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slots {
    /// Object directories; the flag tells whether an index file exists.
    pub objects: BTreeMap<ObjectId, bool>,
    /// Index files whose object directory is gone.
    pub orphan_indexes: Vec<ObjectId>,
}

/// Path arithmetic for one registry's directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    data_file_name: String,
}

impl Layout {
    #[must_use]
    pub fn new(location: &Path, name: &str, data_file_name: &str) -> Self {
        Self {
            root: location.join(VERSION_DIR).join(name),
            data_file_name: data_file_name.to_string(),
        }
    }

    /// `<location>/6.0/<name>`.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn bucket_dir(&self, id: ObjectId) -> PathBuf {
        self.root.join(format!("{}{BUCKET_SUFFIX}", id.bucket()))
    }

    #[must_use]
    pub fn object_dir(&self, id: ObjectId) -> PathBuf {
        self.bucket_dir(id).join(id.to_string())
    }

    #[must_use]
    pub fn data_path(&self, id: ObjectId) -> PathBuf {
        self.object_dir(id).join(&self.data_file_name)
    }

    #[must_use]
    pub fn index_path(&self, id: ObjectId) -> PathBuf {
        self.bucket_dir(id).join(format!("{id}{INDEX_SUFFIX}"))
    }

    #[must_use]
    pub fn child_dir(&self, id: ObjectId, n: usize) -> PathBuf {
        self.object_dir(id).join(n.to_string())
    }

    #[must_use]
    pub fn child_data_path(&self, id: ObjectId, n: usize) -> PathBuf {
        self.child_dir(id, n).join(&self.data_file_name)
    }

    #[must_use]
    pub fn master_index_path(&self) -> PathBuf {
        self.root.join(MASTER_INDEX_NAME)
    }

    /// Lists every object slot under the buckets. Nothing is modified.
    pub fn scan(&self) -> io::Result<Slots> {
        let mut slots = Slots::default();
        for bucket in fs::read_dir(&self.root)? {
            let bucket = bucket?;
            let is_bucket = bucket.file_name().to_str().and_then(parse_bucket).is_some();
            if !is_bucket || !bucket.file_type()?.is_dir() {
                continue;
            }
            let names: Vec<String> = fs::read_dir(bucket.path())?
                .filter_map(Result::ok)
                .filter_map(|e| e.file_name().into_string().ok())
                .collect();
            for name in names.iter().filter(|n| is_numeric(n)) {
                if let Ok(id) = name.parse() {
                    slots.objects.insert(id, false);
                }
            }
            for id in names.iter().filter_map(|n| parse_index_name(n)) {
                match slots.objects.get_mut(&id) {
                    Some(has_index) => *has_index = true,
                    None => slots.orphan_indexes.push(id),
                }
            }
        }
        slots.orphan_indexes.sort();
        Ok(slots)
    }
}

/// `data` → `data~`.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, "~")
}

/// `data` → `data.new`.
#[must_use]
pub fn new_path(path: &Path) -> PathBuf {
    with_suffix(path, ".new")
}

pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Bucket number of a `<n>xxx` directory name.
#[must_use]
pub fn parse_bucket(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(BUCKET_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Object id of a `<id>.index` file name.
#[must_use]
pub fn parse_index_name(name: &str) -> Option<ObjectId> {
    name.strip_suffix(INDEX_SUFFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_bucket_scheme() {
        let layout = Layout::new(Path::new("/r"), "jobs", "data");
        let id = ObjectId::new(1234);
        assert_eq!(layout.root(), Path::new("/r/6.0/jobs"));
        assert_eq!(layout.data_path(id), Path::new("/r/6.0/jobs/1xxx/1234/data"));
        assert_eq!(layout.index_path(id), Path::new("/r/6.0/jobs/1xxx/1234.index"));
        assert_eq!(
            layout.child_data_path(ObjectId::new(7), 3),
            Path::new("/r/6.0/jobs/0xxx/7/3/data")
        );
        assert_eq!(layout.master_index_path(), Path::new("/r/6.0/jobs/master.idx"));
    }

    #[test]
    fn suffixes_are_appended() {
        let path = Path::new("/r/0xxx/1/data");
        assert_eq!(backup_path(path), Path::new("/r/0xxx/1/data~"));
        assert_eq!(new_path(path), Path::new("/r/0xxx/1/data.new"));
    }

    #[test]
    fn scan_pairs_directories_with_indexes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = Layout::new(tmp.path(), "jobs", "data");
        fs::create_dir_all(layout.object_dir(ObjectId::new(1))).unwrap();
        fs::create_dir_all(layout.object_dir(ObjectId::new(1001))).unwrap();
        fs::write(layout.index_path(ObjectId::new(1)), "{}").unwrap();
        fs::write(layout.index_path(ObjectId::new(2)), "{}").unwrap();
        fs::create_dir_all(layout.root().join("sessions")).unwrap();

        let slots = layout.scan().unwrap();
        assert_eq!(
            slots.objects.into_iter().collect::<Vec<_>>(),
            vec![(ObjectId::new(1), true), (ObjectId::new(1001), false)]
        );
        assert_eq!(slots.orphan_indexes, vec![ObjectId::new(2)]);
    }

    #[test]
    fn directory_names_are_parsed_strictly() {
        assert_eq!(parse_bucket("12xxx"), Some(12));
        assert_eq!(parse_bucket("xxx"), None);
        assert_eq!(parse_bucket("1a2xxx"), None);
        assert_eq!(parse_index_name("42.index"), Some(ObjectId::new(42)));
        assert_eq!(parse_index_name("42.index~"), None);
        assert_eq!(parse_index_name("x.index"), None);
    }
}
