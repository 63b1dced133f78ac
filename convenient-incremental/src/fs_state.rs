//! Dirty-state store
//!
//! Every target owns a [`FilesDelta`]: the files waiting for recompilation,
//! bucketed by source root, and the paths known to be deleted, both split by
//! production/test scope. While a chunk is being built, each of its targets
//! additionally has round overlays: `next` collects files marked during the
//! current pass, and becomes `current` (the view builders read) when the
//! next pass begins.
//!
//! All collections are guarded internally; callers never lock.

use crate::model::{SourceScope, TargetId};
use crate::storage::TimestampStore;
use crate::target_index::RootDescriptor;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which round overlay a mark should also land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationRound {
    /// The overlay builders are reading right now
    Current,
    /// The overlay of the upcoming pass
    Next,
}

#[derive(Debug, Default)]
struct DeltaData {
    recompile: BTreeMap<PathBuf, (RootDescriptor, BTreeSet<PathBuf>)>,
    deleted: HashMap<SourceScope, BTreeSet<PathBuf>>,
}

impl DeltaData {
    fn is_deleted(&self, scope: SourceScope, file: &Path) -> bool {
        self.deleted.get(&scope).is_some_and(|deleted| deleted.contains(file))
    }
}

/// Dirty and deleted files of one target.
#[derive(Debug, Default)]
pub struct FilesDelta {
    data: Mutex<DeltaData>,
}

impl FilesDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the file wasn't dirty before.
    pub fn mark_recompile(&self, root: &RootDescriptor, file: &Path) -> bool {
        let mut data = self.data.lock();
        if let Some(deleted) = data.deleted.get_mut(&root.scope) {
            let _ = deleted.remove(file);
        }
        Self::insert_dirty(&mut data, root, file)
    }

    pub fn mark_recompile_if_not_deleted(&self, root: &RootDescriptor, file: &Path) -> bool {
        let mut data = self.data.lock();
        if data.is_deleted(root.scope, file) {
            return false;
        }
        Self::insert_dirty(&mut data, root, file)
    }

    fn insert_dirty(data: &mut DeltaData, root: &RootDescriptor, file: &Path) -> bool {
        data.recompile
            .entry(root.root.clone())
            .or_insert_with(|| (root.clone(), BTreeSet::new()))
            .1
            .insert(file.to_path_buf())
    }

    /// Record `file` as deleted; it stops being dirty in the same scope.
    pub fn add_deleted(&self, scope: SourceScope, file: &Path) {
        let mut data = self.data.lock();
        for (descriptor, files) in data.recompile.values_mut() {
            if descriptor.scope == scope {
                let _ = files.remove(file);
            }
        }
        let _ = data.deleted.entry(scope).or_default().insert(file.to_path_buf());
    }

    /// Remove and return the dirty files of one root.
    pub fn clear_recompile(&self, root: &RootDescriptor) -> Option<BTreeSet<PathBuf>> {
        self.data
            .lock()
            .recompile
            .remove(&root.root)
            .map(|(_, files)| files)
            .filter(|files| !files.is_empty())
    }

    pub fn get_and_clear_deleted(&self, scope: SourceScope) -> BTreeSet<PathBuf> {
        self.data.lock().deleted.remove(&scope).unwrap_or_default()
    }

    pub fn deleted(&self, scope: SourceScope) -> BTreeSet<PathBuf> {
        self.data.lock().deleted.get(&scope).cloned().unwrap_or_default()
    }

    /// Snapshot of the dirty files of one scope, with their roots.
    pub fn dirty_files(&self, scope: SourceScope) -> Vec<(RootDescriptor, PathBuf)> {
        let data = self.data.lock();
        data.recompile
            .values()
            .filter(|(descriptor, _)| descriptor.scope == scope)
            .flat_map(|(descriptor, files)| files.iter().map(|file| (descriptor.clone(), file.clone())))
            .collect()
    }

    pub fn is_marked(&self, file: &Path) -> bool {
        self.data.lock().recompile.values().any(|(_, files)| files.contains(file))
    }

    pub fn has_changes(&self) -> bool {
        let data = self.data.lock();
        data.recompile.values().any(|(_, files)| !files.is_empty())
            || data.deleted.values().any(|deleted| !deleted.is_empty())
    }
}

#[derive(Debug, Default)]
struct RoundDeltas {
    current: Option<Arc<FilesDelta>>,
    next: Option<Arc<FilesDelta>>,
}

/// Dirty state of every target for one build session.
#[derive(Debug, Default)]
pub struct FsState {
    deltas: Mutex<HashMap<TargetId, Arc<FilesDelta>>>,
    rounds: Mutex<HashMap<TargetId, RoundDeltas>>,
    initial_scan_performed: Mutex<HashSet<TargetId>>,
    event_stamps: Mutex<HashMap<PathBuf, i64>>,
}

impl FsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Main delta of `target`.
    pub fn delta(&self, target: &TargetId) -> Arc<FilesDelta> {
        Arc::clone(self.deltas.lock().entry(target.clone()).or_default())
    }

    fn round_delta(&self, target: &TargetId, round: CompilationRound) -> Option<Arc<FilesDelta>> {
        let rounds = self.rounds.lock();
        let deltas = rounds.get(target)?;
        match round {
            CompilationRound::Current => deltas.current.clone(),
            CompilationRound::Next => deltas.next.clone(),
        }
    }

    /// Delta builders should read: the current round overlay when one is
    /// active, otherwise the main delta.
    fn effective_delta(&self, target: &TargetId) -> Arc<FilesDelta> {
        self.round_delta(target, CompilationRound::Current)
            .unwrap_or_else(|| self.delta(target))
    }

    /// Mark `file` dirty. Returns `true` if it was newly added, in which
    /// case its committed stamp (if `stamps` is given) is dropped.
    pub fn mark_dirty(
        &self,
        round: CompilationRound,
        root: &RootDescriptor,
        file: &Path,
        stamps: Option<&TimestampStore>,
    ) -> bool {
        let marked = self.delta(&root.target).mark_recompile(root, file);
        if let Some(overlay) = self.round_delta(&root.target, round) {
            let _ = overlay.mark_recompile(root, file);
        }
        if marked && let Some(stamps) = stamps {
            stamps.remove_stamp(&root.target, file);
        }
        marked
    }

    pub fn mark_dirty_if_not_deleted(
        &self,
        round: CompilationRound,
        root: &RootDescriptor,
        file: &Path,
        stamps: Option<&TimestampStore>,
    ) -> bool {
        let marked = self.delta(&root.target).mark_recompile_if_not_deleted(root, file);
        if marked {
            if let Some(overlay) = self.round_delta(&root.target, round) {
                let _ = overlay.mark_recompile(root, file);
            }
            if let Some(stamps) = stamps {
                stamps.remove_stamp(&root.target, file);
            }
        }
        marked
    }

    /// Record a path that no longer exists and forget its stamp.
    pub fn register_deleted(
        &self,
        target: &TargetId,
        scope: SourceScope,
        file: &Path,
        stamps: Option<&TimestampStore>,
    ) {
        if let Some(stamps) = stamps {
            stamps.remove_stamp(target, file);
        }
        self.delta(target).add_deleted(scope, file);
        if let Some(overlay) = self.round_delta(target, CompilationRound::Current) {
            overlay.add_deleted(scope, file);
        }
    }

    pub fn clear_recompile(&self, root: &RootDescriptor) -> Option<BTreeSet<PathBuf>> {
        self.delta(&root.target).clear_recompile(root)
    }

    pub fn clear_deleted_paths(&self, target: &TargetId) {
        let delta = self.delta(target);
        for scope in SourceScope::ALL {
            let _ = delta.get_and_clear_deleted(scope);
        }
    }

    pub fn get_and_clear_deleted_paths(&self, target: &TargetId, scope: SourceScope) -> BTreeSet<PathBuf> {
        self.delta(target).get_and_clear_deleted(scope)
    }

    /// Visit the dirty files of the active delta. The visitor returns
    /// `false` to stop; the result tells whether every file was visited.
    ///
    /// The visitor runs on a snapshot, so it may mark files itself.
    pub fn process_files_to_recompile(
        &self,
        target: &TargetId,
        scope: SourceScope,
        mut visitor: impl FnMut(&RootDescriptor, &Path) -> bool,
    ) -> bool {
        let snapshot = self.effective_delta(target).dirty_files(scope);
        snapshot.iter().all(|(root, file)| visitor(root, file.as_path()))
    }

    pub fn is_marked_for_recompilation(&self, target: &TargetId, file: &Path) -> bool {
        self.delta(target).is_marked(file)
    }

    /// Dirty files of `target` in the main delta.
    pub fn dirty_files(&self, target: &TargetId) -> Vec<PathBuf> {
        let delta = self.delta(target);
        SourceScope::ALL
            .into_iter()
            .flat_map(|scope| delta.dirty_files(scope))
            .map(|(_, file)| file)
            .collect()
    }

    pub fn deleted_paths(&self, target: &TargetId) -> Vec<PathBuf> {
        let delta = self.delta(target);
        SourceScope::ALL
            .into_iter()
            .flat_map(|scope| delta.deleted(scope))
            .collect()
    }

    pub fn has_unprocessed_changes(&self, target: &TargetId) -> bool {
        self.deltas.lock().get(target).is_some_and(|delta| delta.has_changes())
    }

    pub fn mark_initial_scan_performed(&self, target: &TargetId) {
        let _ = self.initial_scan_performed.lock().insert(target.clone());
    }

    pub fn is_initial_scan_performed(&self, target: &TargetId) -> bool {
        self.initial_scan_performed.lock().contains(target)
    }

    /// Open the overlays of a chunk: no current overlay yet, a fresh next one.
    pub fn before_chunk_build_start(&self, targets: &[TargetId]) {
        let mut rounds = self.rounds.lock();
        for target in targets {
            let _ = rounds.insert(
                target.clone(),
                RoundDeltas {
                    current: None,
                    next: Some(Arc::new(FilesDelta::new())),
                },
            );
        }
    }

    /// Start a pass. The first pass reads the main delta; later passes read
    /// what was marked during the previous one.
    pub fn begin_round(&self, targets: &[TargetId], first_pass: bool) {
        let mut rounds = self.rounds.lock();
        for target in targets {
            let deltas = rounds.entry(target.clone()).or_default();
            deltas.current = if first_pass {
                None
            } else {
                Some(deltas.next.take().unwrap_or_default())
            };
            deltas.next = Some(Arc::new(FilesDelta::new()));
        }
    }

    /// Drop the overlays of a chunk.
    pub fn end_round(&self, targets: &[TargetId]) {
        let mut rounds = self.rounds.lock();
        for target in targets {
            let _ = rounds.remove(target);
        }
    }

    /// Remember when the host reported a change of `file`.
    pub fn register_event(&self, file: &Path, stamp: i64) {
        let _ = self.event_stamps.lock().insert(file.to_path_buf(), stamp);
    }

    pub fn event_registration_stamp(&self, file: &Path) -> Option<i64> {
        self.event_stamps.lock().get(file).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root(target: &str, path: &str, scope: SourceScope) -> RootDescriptor {
        RootDescriptor {
            target: TargetId::new(target),
            root: PathBuf::from(path),
            scope,
            generated: false,
        }
    }

    #[test]
    fn test_mark_dirty_is_idempotent_and_drops_stamp() {
        let dir = TempDir::new().unwrap();
        let stamps = TimestampStore::load(&dir.path().join("ts.json")).unwrap();
        let state = FsState::new();
        let rd = root("t", "/src", SourceScope::Production);
        let file = Path::new("/src/a.java");
        stamps.save_stamp(&rd.target, file, 5);

        assert!(state.mark_dirty(CompilationRound::Current, &rd, file, Some(&stamps)));
        assert_eq!(stamps.stamp(&rd.target, file), None);

        stamps.save_stamp(&rd.target, file, 6);
        assert!(!state.mark_dirty(CompilationRound::Current, &rd, file, Some(&stamps)));
        assert_eq!(stamps.stamp(&rd.target, file), Some(6));
    }

    #[test]
    fn test_dirty_and_deleted_are_exclusive() {
        let state = FsState::new();
        let rd = root("t", "/src", SourceScope::Production);
        let file = Path::new("/src/a.java");

        let _ = state.mark_dirty(CompilationRound::Current, &rd, file, None);
        state.register_deleted(&rd.target, SourceScope::Production, file, None);
        assert!(state.dirty_files(&rd.target).is_empty());
        assert_eq!(state.deleted_paths(&rd.target), vec![file.to_path_buf()]);
        assert!(!state.mark_dirty_if_not_deleted(CompilationRound::Current, &rd, file, None));

        let _ = state.mark_dirty(CompilationRound::Current, &rd, file, None);
        assert!(state.deleted_paths(&rd.target).is_empty());
        assert_eq!(state.dirty_files(&rd.target), vec![file.to_path_buf()]);
    }

    #[test]
    fn test_deleted_paths_are_partitioned_by_scope() {
        let state = FsState::new();
        let target = TargetId::new("t");
        state.register_deleted(&target, SourceScope::Tests, Path::new("/test/a"), None);
        state.register_deleted(&target, SourceScope::Production, Path::new("/src/b"), None);

        let tests = state.get_and_clear_deleted_paths(&target, SourceScope::Tests);
        assert_eq!(tests.into_iter().collect::<Vec<_>>(), vec![PathBuf::from("/test/a")]);
        assert_eq!(state.deleted_paths(&target), vec![PathBuf::from("/src/b")]);
    }

    #[test]
    fn test_clear_recompile_returns_files_once() {
        let state = FsState::new();
        let rd = root("t", "/src", SourceScope::Production);
        let _ = state.mark_dirty(CompilationRound::Current, &rd, Path::new("/src/a"), None);
        let _ = state.mark_dirty(CompilationRound::Current, &rd, Path::new("/src/b"), None);

        assert_eq!(state.clear_recompile(&rd).map(|files| files.len()), Some(2));
        assert_eq!(state.clear_recompile(&rd), None);
        assert!(!state.has_unprocessed_changes(&rd.target));
    }

    #[test]
    fn test_rounds_expose_only_files_marked_in_previous_pass() {
        let state = FsState::new();
        let rd = root("t", "/src", SourceScope::Production);
        let targets = [rd.target.clone()];
        let _ = state.mark_dirty(CompilationRound::Current, &rd, Path::new("/src/old"), None);

        let visible = |state: &FsState| {
            let mut files = Vec::new();
            let _ = state.process_files_to_recompile(&rd.target, SourceScope::Production, |_, file| {
                files.push(file.to_path_buf());
                true
            });
            files
        };

        state.before_chunk_build_start(&targets);
        state.begin_round(&targets, true);
        assert_eq!(visible(&state), vec![PathBuf::from("/src/old")]);

        let _ = state.mark_dirty(CompilationRound::Next, &rd, Path::new("/src/new"), None);
        state.begin_round(&targets, false);
        assert_eq!(visible(&state), vec![PathBuf::from("/src/new")]);

        state.begin_round(&targets, false);
        assert!(visible(&state).is_empty());

        state.end_round(&targets);
        assert_eq!(visible(&state).len(), 2);
    }

    #[test]
    fn test_visitor_can_stop_early() {
        let state = FsState::new();
        let rd = root("t", "/src", SourceScope::Production);
        for name in ["/src/a", "/src/b", "/src/c"] {
            let _ = state.mark_dirty(CompilationRound::Current, &rd, Path::new(name), None);
        }
        let mut seen = 0;
        let completed = state.process_files_to_recompile(&rd.target, SourceScope::Production, |_, _| {
            seen += 1;
            seen < 2
        });
        assert!(!completed);
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_concurrent_marking() {
        let state = Arc::new(FsState::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    let rd = root("t", "/src", SourceScope::Production);
                    for i in 0..100 {
                        let file = PathBuf::from(format!("/src/{worker}/{i}"));
                        let _ = state.mark_dirty(CompilationRound::Next, &rd, &file, None);
                        if i % 2 == 0 {
                            state.register_deleted(&rd.target, SourceScope::Production, &file, None);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let target = TargetId::new("t");
        assert_eq!(state.dirty_files(&target).len(), 400);
        assert_eq!(state.deleted_paths(&target).len(), 400);
    }
}
