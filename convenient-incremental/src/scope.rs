//! What a build session covers

use crate::model::TargetId;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// How a session treats incremental state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Discard all build data and recompile everything
    Rebuild,
    /// Recompile only what changed
    #[default]
    Make,
    /// Recompile the affected targets from scratch, everything else incrementally
    Chunk,
}

/// Affected targets and files of a session.
#[derive(Debug, Clone, Default)]
pub struct CompileScope {
    targets: Option<HashSet<TargetId>>,
    forced: HashSet<TargetId>,
    force_all: bool,
    files: HashMap<TargetId, HashSet<PathBuf>>,
}

impl CompileScope {
    /// Every target, incrementally.
    pub fn all() -> Self {
        Self::default()
    }

    /// Every target, from scratch.
    pub fn rebuild() -> Self {
        Self {
            force_all: true,
            ..Self::default()
        }
    }

    /// Restrict the session to `targets`.
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = TargetId>) -> Self {
        self.targets.get_or_insert_with(HashSet::new).extend(targets);
        self
    }

    /// Recompile `targets` from scratch; they are affected too.
    pub fn force(mut self, targets: impl IntoIterator<Item = TargetId>) -> Self {
        let targets: Vec<TargetId> = targets.into_iter().collect();
        if let Some(affected) = self.targets.as_mut() {
            affected.extend(targets.iter().cloned());
        }
        self.forced.extend(targets);
        self
    }

    /// Only `files` of `target` are affected.
    pub fn with_files(mut self, target: TargetId, files: impl IntoIterator<Item = PathBuf>) -> Self {
        if let Some(affected) = self.targets.as_mut() {
            let _ = affected.insert(target.clone());
        }
        self.files.entry(target).or_default().extend(files);
        self
    }

    /// Adjust the scope to `mode`.
    pub(crate) fn for_mode(mut self, mode: BuildMode) -> Self {
        match mode {
            BuildMode::Rebuild => self.force_all = true,
            BuildMode::Chunk => match self.targets.clone() {
                Some(targets) => self.forced.extend(targets),
                None => self.force_all = true,
            },
            BuildMode::Make => {}
        }
        self
    }

    pub fn is_affected(&self, target: &TargetId) -> bool {
        self.targets.as_ref().is_none_or(|targets| targets.contains(target))
    }

    pub fn is_build_forced(&self, target: &TargetId) -> bool {
        self.is_affected(target)
            && (self.force_all || self.forced.contains(target))
            && !self.files.contains_key(target)
    }

    pub fn is_build_forced_for_all_targets(&self) -> bool {
        self.force_all && self.targets.is_none() && self.files.is_empty()
    }

    pub fn is_whole_target_affected(&self, target: &TargetId) -> bool {
        self.is_affected(target) && !self.files.contains_key(target)
    }

    pub fn is_file_affected(&self, target: &TargetId, file: &Path) -> bool {
        match self.files.get(target) {
            Some(files) => files.contains(file),
            None => self.is_affected(target),
        }
    }
}
