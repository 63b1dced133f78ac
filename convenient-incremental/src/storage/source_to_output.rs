//! Per-target mapping from source files to the outputs they produced

use super::{StorageResult, read_json_or_default, write_json};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Source path to produced output paths of one target.
#[derive(Debug)]
pub struct SourceToOutputMapping {
    path: PathBuf,
    entries: RwLock<BTreeMap<PathBuf, BTreeSet<PathBuf>>>,
    modified: AtomicBool,
}

impl SourceToOutputMapping {
    pub(crate) fn load(path: &Path) -> StorageResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(read_json_or_default(path)?),
            modified: AtomicBool::new(false),
        })
    }

    /// Replace the outputs of `source`. An empty set removes the source.
    pub fn set_outputs(&self, source: &Path, outputs: impl IntoIterator<Item = PathBuf>) {
        let outputs: BTreeSet<PathBuf> = outputs.into_iter().collect();
        let mut entries = self.entries.write();
        if outputs.is_empty() {
            let _ = entries.remove(source);
        } else {
            let _ = entries.insert(source.to_path_buf(), outputs);
        }
        self.modified.store(true, Ordering::Release);
    }

    pub fn append_output(&self, source: &Path, output: &Path) {
        let added = self
            .entries
            .write()
            .entry(source.to_path_buf())
            .or_default()
            .insert(output.to_path_buf());
        if added {
            self.modified.store(true, Ordering::Release);
        }
    }

    pub fn outputs(&self, source: &Path) -> Vec<PathBuf> {
        self.entries
            .read()
            .get(source)
            .map(|outputs| outputs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, source: &Path) {
        if self.entries.write().remove(source).is_some() {
            self.modified.store(true, Ordering::Release);
        }
    }

    pub fn sources(&self) -> Vec<PathBuf> {
        self.entries.read().keys().cloned().collect()
    }

    /// Output path to every source producing it.
    pub fn output_to_sources(&self) -> BTreeMap<PathBuf, BTreeSet<PathBuf>> {
        let mut reverse: BTreeMap<PathBuf, BTreeSet<PathBuf>> = BTreeMap::new();
        for (source, outputs) in self.entries.read().iter() {
            for output in outputs {
                let _ = reverse.entry(output.clone()).or_default().insert(source.clone());
            }
        }
        reverse
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        if !entries.is_empty() {
            entries.clear();
            self.modified.store(true, Ordering::Release);
        }
    }

    pub(crate) fn flush(&self) -> StorageResult<()> {
        if !self.modified.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let result = write_json(&self.path, &*self.entries.read());
        if result.is_err() {
            self.modified.store(true, Ordering::Release);
        }
        result
    }
}
