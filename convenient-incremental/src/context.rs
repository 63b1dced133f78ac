//! Per-session build context

use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult};
use crate::events::{ChangePropagator, EventQueue, FsEvent};
use crate::fs_state::{CompilationRound, FsState};
use crate::message::{BuildMessage, MessageHandler};
use crate::model::{SourceScope, TargetId};
use crate::scope::{BuildMode, CompileScope};
use crate::storage::BuildDataManager;
use crate::target_index::BuildTargetIndex;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Current wall clock time in milliseconds since the epoch.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Cooperative cancellation flag, polled between build steps.
#[derive(Debug, Clone, Default)]
pub struct CancelStatus(Arc<AtomicBool>);

impl CancelStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running { compiling_tests: bool },
    Succeeded,
    Failed,
    Cancelled,
}

/// Everything a build step can see about the running session.
///
/// Shared between chunk workers; every mutable part is synchronized.
pub struct CompileContext {
    scope: CompileScope,
    mode: BuildMode,
    test_mode: bool,
    index: Arc<BuildTargetIndex>,
    data: Arc<BuildDataManager>,
    fs_state: FsState,
    cancel: CancelStatus,
    errors: AtomicBool,
    non_incremental: Mutex<HashSet<TargetId>>,
    compilation_start: Mutex<HashMap<TargetId, i64>>,
    removed_sources: Mutex<HashMap<TargetId, Vec<(SourceScope, PathBuf)>>>,
    handler: Arc<dyn MessageHandler>,
    events: EventQueue,
    state: Mutex<SessionState>,
}

impl CompileContext {
    pub fn new(
        config: &BuildConfig,
        scope: CompileScope,
        mode: BuildMode,
        index: Arc<BuildTargetIndex>,
        data: Arc<BuildDataManager>,
        handler: Arc<dyn MessageHandler>,
        cancel: CancelStatus,
    ) -> Self {
        Self {
            scope: scope.for_mode(mode),
            mode,
            test_mode: config.test_mode,
            index,
            data,
            fs_state: FsState::new(),
            cancel,
            errors: AtomicBool::new(false),
            non_incremental: Mutex::new(HashSet::new()),
            compilation_start: Mutex::new(HashMap::new()),
            removed_sources: Mutex::new(HashMap::new()),
            handler,
            events: EventQueue::new(),
            state: Mutex::new(SessionState::NotStarted),
        }
    }

    pub fn scope(&self) -> &CompileScope {
        &self.scope
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn is_project_rebuild(&self) -> bool {
        self.mode == BuildMode::Rebuild
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn index(&self) -> &BuildTargetIndex {
        &self.index
    }

    pub fn data(&self) -> &BuildDataManager {
        &self.data
    }

    pub fn fs_state(&self) -> &FsState {
        &self.fs_state
    }

    pub fn cancel_status(&self) -> &CancelStatus {
        &self.cancel
    }

    /// Fails with [`BuildError::Cancelled`] once cancellation was requested.
    pub fn check_canceled(&self) -> BuildResult<()> {
        if self.cancel.is_canceled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Forward a message to the host. Errors taint the whole session.
    pub fn process_message(&self, message: BuildMessage) {
        if message.is_error() {
            self.errors.store(true, Ordering::SeqCst);
        }
        self.handler.process_message(&message);
    }

    pub fn errors_detected(&self) -> bool {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn mark_non_incremental(&self, target: &TargetId) {
        let _ = self.non_incremental.lock().insert(target.clone());
    }

    pub fn clear_non_incremental_mark(&self, target: &TargetId) {
        let _ = self.non_incremental.lock().remove(target);
    }

    /// Whether incremental analysis of `target` is still meaningful.
    pub fn should_differentiate(&self, target: &TargetId) -> bool {
        !self.is_project_rebuild() && !self.non_incremental.lock().contains(target)
    }

    pub(crate) fn set_compilation_start(&self, targets: &[TargetId], stamp: i64) {
        let mut starts = self.compilation_start.lock();
        for target in targets {
            let _ = starts.insert(target.clone(), stamp);
        }
    }

    /// When the last build of `target`'s chunk started; `i64::MAX` if it never did.
    pub fn compilation_start(&self, target: &TargetId) -> i64 {
        self.compilation_start
            .lock()
            .get(target)
            .copied()
            .unwrap_or(i64::MAX)
    }

    pub(crate) fn add_removed_sources(&self, target: &TargetId, sources: Vec<(SourceScope, PathBuf)>) {
        self.removed_sources
            .lock()
            .entry(target.clone())
            .or_default()
            .extend(sources);
    }

    /// Sources of `target` deleted since it was last built.
    pub fn removed_sources(&self, target: &TargetId) -> Vec<PathBuf> {
        self.removed_sources
            .lock()
            .get(target)
            .map(|sources| sources.iter().map(|(_, path)| path.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn take_removed_sources(&self, target: &TargetId) -> Vec<(SourceScope, PathBuf)> {
        self.removed_sources.lock().remove(target).unwrap_or_default()
    }

    /// Queue a file system change for propagation.
    pub fn publish_event(&self, event: FsEvent) {
        self.events.publish(event);
    }

    /// Apply every queued file system change to the dirty state.
    pub fn drain_events(&self) {
        let events = self.events.drain();
        if events.is_empty() {
            return;
        }
        let propagator = ChangePropagator::new(self.index.roots(), &self.fs_state, self.data.timestamps());
        for event in events {
            propagator.apply(&event);
            let message = match event {
                FsEvent::FilesGenerated { source_target, paths } => BuildMessage::FilesGenerated {
                    target: source_target,
                    paths,
                },
                FsEvent::FilesDeleted { paths } => BuildMessage::FilesDeleted { paths },
            };
            self.process_message(message);
        }
    }

    /// Host notification that `file` changed while the session is running.
    pub fn notify_file_changed(&self, file: &Path) {
        let stamp = now_millis();
        self.fs_state.register_event(file, stamp);
        for descriptor in self.index.roots().find_all_parent_descriptors(file) {
            let _ = self.fs_state.mark_dirty(
                CompilationRound::Next,
                descriptor,
                file,
                Some(self.data.timestamps()),
            );
        }
        debug!("Registered change of {} at {stamp}", file.display());
    }

    pub fn session_state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn start(&self) {
        *self.state.lock() = SessionState::Running {
            compiling_tests: false,
        };
    }

    pub(crate) fn enter_tests(&self) {
        let mut state = self.state.lock();
        if let SessionState::Running { compiling_tests } = &mut *state {
            *compiling_tests = true;
        }
    }

    pub(crate) fn finish(&self, result: &BuildResult<()>) {
        let next = match result {
            Ok(()) => SessionState::Succeeded,
            Err(BuildError::Cancelled) => SessionState::Cancelled,
            Err(_) => SessionState::Failed,
        };
        *self.state.lock() = next;
    }
}
