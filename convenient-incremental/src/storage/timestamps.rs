//! Timestamp store: last committed modification stamp of each source file

use super::{StorageResult, read_json_or_default, write_json};
use crate::model::TargetId;
use filetime::FileTime;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

type Table = BTreeMap<TargetId, BTreeMap<PathBuf, i64>>;

/// Modification time of `path` in milliseconds since the epoch, `None` if it doesn't exist.
pub fn last_modified(path: &Path) -> Option<i64> {
    let metadata = std::fs::metadata(path).ok()?;
    let time = FileTime::from_last_modification_time(&metadata);
    Some(time.unix_seconds() * 1000 + i64::from(time.nanoseconds() / 1_000_000))
}

/// Project-wide table of committed stamps, keyed by target then path.
///
/// A path without a stamp is always dirty.
#[derive(Debug)]
pub struct TimestampStore {
    path: PathBuf,
    table: RwLock<Table>,
    modified: AtomicBool,
}

impl TimestampStore {
    pub(crate) fn load(path: &Path) -> StorageResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            table: RwLock::new(read_json_or_default(path)?),
            modified: AtomicBool::new(false),
        })
    }

    pub fn stamp(&self, target: &TargetId, file: &Path) -> Option<i64> {
        self.table.read().get(target)?.get(file).copied()
    }

    pub fn save_stamp(&self, target: &TargetId, file: &Path, stamp: i64) {
        let _ = self
            .table
            .write()
            .entry(target.clone())
            .or_default()
            .insert(file.to_path_buf(), stamp);
        self.modified.store(true, Ordering::Release);
    }

    pub fn remove_stamp(&self, target: &TargetId, file: &Path) {
        let mut table = self.table.write();
        if let Some(files) = table.get_mut(target)
            && files.remove(file).is_some()
        {
            self.modified.store(true, Ordering::Release);
        }
    }

    /// Whether `file` must be recompiled given its current on-disk stamp.
    pub fn is_dirty(&self, target: &TargetId, file: &Path, current: Option<i64>) -> bool {
        match (self.stamp(target, file), current) {
            (Some(stored), Some(current)) => stored != current,
            _ => true,
        }
    }

    pub fn clean_target(&self, target: &TargetId) {
        if self.table.write().remove(target).is_some() {
            self.modified.store(true, Ordering::Release);
        }
    }

    pub fn stamp_count(&self, target: &TargetId) -> usize {
        self.table.read().get(target).map_or(0, BTreeMap::len)
    }

    pub(crate) fn flush(&self) -> StorageResult<()> {
        if !self.modified.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let result = write_json(&self.path, &*self.table.read());
        if result.is_err() {
            self.modified.store(true, Ordering::Release);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_stamp_is_dirty() {
        let dir = TempDir::new().unwrap();
        let store = TimestampStore::load(&dir.path().join("timestamps.json")).unwrap();
        let target = TargetId::new("t");
        let file = Path::new("/src/a.java");

        assert!(store.is_dirty(&target, file, Some(10)));
        store.save_stamp(&target, file, 10);
        assert!(!store.is_dirty(&target, file, Some(10)));
        assert!(store.is_dirty(&target, file, Some(11)));
        assert!(store.is_dirty(&target, file, None));

        store.remove_stamp(&target, file);
        assert!(store.is_dirty(&target, file, Some(10)));
    }

    #[test]
    fn test_last_modified_reads_mtime() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "a").unwrap();
        filetime::set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 250_000_000)).unwrap();

        assert_eq!(last_modified(&file), Some(1_700_000_000_250));
        assert_eq!(last_modified(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_flush_only_when_modified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timestamps.json");
        let store = TimestampStore::load(&path).unwrap();
        store.flush().unwrap();
        assert!(!path.exists());

        store.save_stamp(&TargetId::new("t"), Path::new("/a"), 1);
        store.flush().unwrap();
        assert!(path.exists());
    }
}
