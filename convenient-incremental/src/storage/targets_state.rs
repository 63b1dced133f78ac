//! Known targets and their configuration fingerprints

use super::{StorageResult, read_json_or_default, write_json};
use crate::model::TargetId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TargetRecord {
    fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_rebuild_millis: Option<u64>,
}

/// Configuration fingerprints of every target seen by a previous build.
#[derive(Debug)]
pub struct TargetsState {
    path: PathBuf,
    records: RwLock<BTreeMap<TargetId, TargetRecord>>,
    modified: AtomicBool,
}

impl TargetsState {
    pub(crate) fn load(path: &Path) -> StorageResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            records: RwLock::new(read_json_or_default(path)?),
            modified: AtomicBool::new(false),
        })
    }

    pub fn fingerprint(&self, target: &TargetId) -> Option<String> {
        self.records.read().get(target).map(|r| r.fingerprint.clone())
    }

    /// Whether `current` differs from the stored fingerprint. Unknown targets are changed.
    pub fn is_changed(&self, target: &TargetId, current: &str) -> bool {
        self.records
            .read()
            .get(target)
            .is_none_or(|record| record.fingerprint != current)
    }

    pub fn save_fingerprint(&self, target: &TargetId, fingerprint: &str) {
        let mut records = self.records.write();
        let record = records.entry(target.clone()).or_default();
        if record.fingerprint != fingerprint {
            record.fingerprint = fingerprint.to_string();
            self.modified.store(true, Ordering::Release);
        }
    }

    pub fn last_rebuild_millis(&self, target: &TargetId) -> Option<u64> {
        self.records.read().get(target)?.last_rebuild_millis
    }

    pub fn set_last_rebuild_millis(&self, target: &TargetId, millis: u64) {
        if let Some(record) = self.records.write().get_mut(target) {
            record.last_rebuild_millis = Some(millis);
            self.modified.store(true, Ordering::Release);
        }
    }

    /// Recorded targets that no longer exist in the project.
    pub fn stale_targets(&self, current: &HashSet<TargetId>) -> Vec<TargetId> {
        self.records
            .read()
            .keys()
            .filter(|id| !current.contains(*id))
            .cloned()
            .collect()
    }

    pub fn remove(&self, target: &TargetId) {
        if self.records.write().remove(target).is_some() {
            self.modified.store(true, Ordering::Release);
        }
    }

    pub(crate) fn flush(&self) -> StorageResult<()> {
        if !self.modified.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let result = write_json(&self.path, &*self.records.read());
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
    fn test_fingerprints_and_stale_targets() {
        let dir = TempDir::new().unwrap();
        let state = TargetsState::load(&dir.path().join("targets.json")).unwrap();
        let a = TargetId::new("a");
        let gone = TargetId::new("gone");

        assert!(state.is_changed(&a, "f1"));
        state.save_fingerprint(&a, "f1");
        state.save_fingerprint(&gone, "f2");
        assert!(!state.is_changed(&a, "f1"));
        assert!(state.is_changed(&a, "f3"));

        let current: HashSet<TargetId> = [a.clone()].into_iter().collect();
        assert_eq!(state.stale_targets(&current), vec![gone.clone()]);

        state.set_last_rebuild_millis(&a, 1500);
        assert_eq!(state.last_rebuild_millis(&a), Some(1500));
        state.remove(&gone);
        assert!(state.stale_targets(&current).is_empty());
    }
}
