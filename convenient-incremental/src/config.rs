//! Session configuration

use std::path::PathBuf;

/// Configuration of a [`ProjectBuilder`](crate::ProjectBuilder).
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Root directory of the durable build data
    pub data_dir: PathBuf,
    /// Maximum number of chunks built concurrently
    pub max_parallelism: usize,
    /// Wipe build data and rebuild the project when the data turns out corrupted
    pub rebuild_on_corruption: bool,
    /// Extra diagnostics for tests (race guard decisions are logged at info level)
    pub test_mode: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".kessel"),
            max_parallelism: num_cpus::get(),
            rebuild_on_corruption: true,
            test_mode: false,
        }
    }
}

impl BuildConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}
