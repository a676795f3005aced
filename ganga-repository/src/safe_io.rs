//! Crash-tolerant file primitives.
//!
//! A body write never truncates the primary file in place: the new
//! contents go to `<file>.new` and are synced, the old primary is renamed to
//! `<file>~`, and only then does `.new` take the primary name. A reader
//! sees the old version, the new version, or a missing primary with the
//! previous version still available as the backup.

use crate::layout::{backup_path, new_path, with_suffix};
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes `contents` to `path`, keeping the previous version as `path~`.
pub fn safe_save(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let fresh = new_path(path);
    write_synced(&fresh, contents)?;
    match fs::rename(path, backup_path(path)) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(&fresh, path)
}

/// Replaces `path` atomically without keeping a backup.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = with_suffix(path, &format!(".{}.tmp", std::process::id()));
    write_synced(&tmp, contents)?;
    fs::rename(&tmp, path)
}

fn write_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Removes a file or directory tree; missing paths are not an error.
///
/// The entry is first renamed aside so that a concurrent directory listing
/// never sees a half-removed object under its real name.
pub fn rmrf(path: &Path) -> io::Result<()> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let doomed = with_suffix(path, &format!("_{stamp}__to_be_deleted_"));
    match fs::rename(path, &doomed) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }
    let removed = match fs::symlink_metadata(&doomed) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&doomed),
        Ok(_) => fs::remove_file(&doomed),
        Err(e) => Err(e),
    };
    match removed {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Whether a directory entry name is a plain decimal number.
pub fn is_numeric(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn safe_save_rotates_backup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a/b/data");
        safe_save(&path, b"one").unwrap();
        assert!(!backup_path(&path).exists());
        safe_save(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read(backup_path(&path)).unwrap(), b"one");
        assert!(!new_path(&path).exists());
    }

    #[test]
    fn write_atomic_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("x.index");
        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"[]").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"[]");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn rmrf_handles_trees_files_and_absence() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("7");
        fs::create_dir_all(dir.join("0")).unwrap();
        fs::write(dir.join("0/data"), "x").unwrap();
        let file = tmp.path().join("7.index");
        fs::write(&file, "x").unwrap();

        rmrf(&dir).unwrap();
        rmrf(&file).unwrap();
        rmrf(&tmp.path().join("missing")).unwrap();
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn numeric_names() {
        assert!(is_numeric("0"));
        assert!(is_numeric("120"));
        assert!(!is_numeric(""));
        assert!(!is_numeric("1.index"));
        assert!(!is_numeric("-1"));
    }
}
