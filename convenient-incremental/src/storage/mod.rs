//! Durable build data
//!
//! Everything lives under one data directory as JSON documents:
//!
//! ```text
//! <data_dir>/
//! ├── timestamps.json          # target -> path -> stamp
//! ├── targets.json             # target -> configuration fingerprint
//! └── mappings/<target>.json   # source -> outputs
//! ```
//!
//! Documents are loaded when a session opens the data and flushed when it
//! ends. Every write goes through a temp file and a rename, so a crash leaves
//! either the old or the new document, never a torn one.

mod source_to_output;
mod targets_state;
mod timestamps;

pub use source_to_output::SourceToOutputMapping;
pub use targets_state::TargetsState;
pub use timestamps::{TimestampStore, last_modified};

use crate::model::TargetId;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors of the durable build data.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed data in {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Write `data` to `path` atomically (temp file, fsync, rename).
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| StorageError::io(&temp_path, e))?;
    file.write_all(data).map_err(|e| StorageError::io(&temp_path, e))?;
    // data must hit the disk before the rename makes it visible
    file.sync_all().map_err(|e| StorageError::io(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| StorageError::io(path, e))?;

    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all(); // Best effort - some filesystems don't support this
    }

    Ok(())
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, &data)
}

/// Read a JSON document that must exist.
pub(crate) fn read_json_file<T: DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let data = fs::read(path).map_err(|e| StorageError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|source| StorageError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a JSON document, falling back to the default value when it doesn't exist yet.
pub(crate) fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> StorageResult<T> {
    match fs::read(path) {
        Ok(data) => serde_json::from_slice(&data).map_err(|source| StorageError::Malformed {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Owner of all durable stores of one project.
#[derive(Debug)]
pub struct BuildDataManager {
    data_dir: PathBuf,
    timestamps: TimestampStore,
    targets_state: TargetsState,
    mappings: Mutex<HashMap<TargetId, Arc<SourceToOutputMapping>>>,
}

impl BuildDataManager {
    /// Open (or create) the build data under `data_dir`.
    pub fn open(data_dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(data_dir).map_err(|e| StorageError::io(data_dir, e))?;
        let timestamps = TimestampStore::load(&data_dir.join("timestamps.json"))?;
        let targets_state = TargetsState::load(&data_dir.join("targets.json"))?;
        debug!("Opened build data at {}", data_dir.display());
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            timestamps,
            targets_state,
            mappings: Mutex::new(HashMap::new()),
        })
    }

    /// Delete all build data under `data_dir`.
    pub fn clean(data_dir: &Path) -> StorageResult<()> {
        match fs::remove_dir_all(data_dir) {
            Ok(()) => {
                info!("Removed build data at {}", data_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(data_dir, e)),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn timestamps(&self) -> &TimestampStore {
        &self.timestamps
    }

    pub fn targets_state(&self) -> &TargetsState {
        &self.targets_state
    }

    /// Source-to-output mapping of `target`, loaded on first access.
    pub fn source_to_output(&self, target: &TargetId) -> StorageResult<Arc<SourceToOutputMapping>> {
        let mut mappings = self.mappings.lock();
        if let Some(mapping) = mappings.get(target) {
            return Ok(Arc::clone(mapping));
        }
        let mapping = Arc::new(SourceToOutputMapping::load(&self.mapping_path(target))?);
        let _ = mappings.insert(target.clone(), Arc::clone(&mapping));
        Ok(mapping)
    }

    /// Forget stamps and outputs recorded for `target`, keeping its fingerprint.
    pub fn clean_target_storages(&self, target: &TargetId) -> StorageResult<()> {
        self.timestamps.clean_target(target);
        self.source_to_output(target)?.clear();
        Ok(())
    }

    /// Drop every trace of `target`.
    pub fn remove_target_data(&self, target: &TargetId) -> StorageResult<()> {
        self.timestamps.clean_target(target);
        self.targets_state.remove(target);
        let _ = self.mappings.lock().remove(target);
        let path = self.mapping_path(target);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Write every modified store back to disk.
    pub fn flush(&self) -> StorageResult<()> {
        self.timestamps.flush()?;
        self.targets_state.flush()?;
        let mappings: Vec<_> = self.mappings.lock().values().cloned().collect();
        for mapping in mappings {
            mapping.flush()?;
        }
        Ok(())
    }

    fn mapping_path(&self, target: &TargetId) -> PathBuf {
        let readable: String = target
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let digest = format!("{:x}", Sha256::digest(target.as_str().as_bytes()));
        self.data_dir
            .join("mappings")
            .join(format!("{readable}-{}.json", &digest[..8]))
    }
}
