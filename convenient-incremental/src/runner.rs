//! Session driver: schedules chunks and owns the session lifecycle

use crate::builder::{BuilderRegistry, BuilderStatistics};
use crate::config::BuildConfig;
use crate::context::{CancelStatus, CompileContext};
use crate::error::{BuildError, BuildOutcome, BuildResult};
use crate::message::{BuildMessage, MessageHandler};
use crate::model::{ProjectModel, TargetId};
use crate::operations;
use crate::pipeline;
use crate::scope::{BuildMode, CompileScope};
use crate::storage::BuildDataManager;
use crate::target_index::BuildTargetIndex;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Pending changes of one target, as reported by [`ProjectBuilder::scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStatus {
    pub dirty: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    /// Duration of the last build that recompiled the target from scratch
    pub last_rebuild_millis: Option<u64>,
}

impl TargetStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.dirty.is_empty() && self.deleted.is_empty()
    }
}

/// Runs build sessions over one project.
///
/// Builders come from an explicitly constructed [`BuilderRegistry`]; two
/// project builders never share mutable state.
pub struct ProjectBuilder {
    config: BuildConfig,
    index: Arc<BuildTargetIndex>,
    registry: Arc<BuilderRegistry>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancelStatus,
    current: Mutex<Option<Arc<CompileContext>>>,
}

impl ProjectBuilder {
    pub fn new(
        config: BuildConfig,
        index: Arc<BuildTargetIndex>,
        registry: Arc<BuilderRegistry>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            config,
            index,
            registry,
            handler,
            cancel: CancelStatus::new(),
            current: Mutex::new(None),
        }
    }

    pub fn from_model(
        config: BuildConfig,
        model: ProjectModel,
        registry: BuilderRegistry,
        handler: Arc<dyn MessageHandler>,
    ) -> BuildResult<Self> {
        let index = BuildTargetIndex::new(model)?;
        Ok(Self::new(config, Arc::new(index), Arc::new(registry), handler))
    }

    pub fn index(&self) -> &BuildTargetIndex {
        &self.index
    }

    /// Flag polled by sessions. Cancelling it stops the running build, or
    /// the next one if none is running; it is cleared when that session ends.
    pub fn cancel_status(&self) -> &CancelStatus {
        &self.cancel
    }

    /// Tell the running session that `file` changed under it. Without a
    /// running session the change is picked up by the next scan anyway.
    pub fn notify_file_changed(&self, file: &Path) {
        if let Some(ctx) = self.current.lock().as_ref() {
            ctx.notify_file_changed(file);
        }
    }

    /// Run a build session.
    ///
    /// When the build data turns out unusable and the configuration allows
    /// it, all build data is dropped and the session reruns as a rebuild.
    pub async fn build(&self, scope: CompileScope, mode: BuildMode) -> BuildOutcome {
        let mut result = self.run_session(scope.clone(), mode).await;
        if let Err(e) = &result
            && e.requests_rebuild()
            && self.config.rebuild_on_corruption
            && mode != BuildMode::Rebuild
        {
            warn!("Incremental build failed, rebuilding the project: {e}");
            self.handler.process_message(&BuildMessage::info(
                "",
                format!("Internal caches are corrupted or have outdated format, forcing project rebuild: {e}"),
            ));
            result = self.run_session(scope, BuildMode::Rebuild).await;
        }
        self.cancel.reset();
        BuildOutcome::from_result(result)
    }

    /// Compute what the next build would recompile without building or
    /// writing anything.
    pub fn scan(&self, scope: CompileScope) -> BuildResult<BTreeMap<TargetId, TargetStatus>> {
        let data = Arc::new(BuildDataManager::open(&self.config.data_dir)?);
        let ctx = self.context(scope, BuildMode::Make, Arc::clone(&data));

        let mut status = BTreeMap::new();
        for target in self.index.targets() {
            if !ctx.scope().is_affected(&target.id) {
                continue;
            }
            operations::ensure_fs_state_initialized(&ctx, target, true)?;
            let _ = status.insert(
                target.id.clone(),
                TargetStatus {
                    dirty: ctx.fs_state().dirty_files(&target.id),
                    deleted: ctx.fs_state().deleted_paths(&target.id),
                    last_rebuild_millis: data.targets_state().last_rebuild_millis(&target.id),
                },
            );
        }
        Ok(status)
    }

    /// Delete every registered output, the output roots and all build data.
    pub fn clean(&self) -> BuildResult<()> {
        let data = Arc::new(BuildDataManager::open(&self.config.data_dir)?);
        let ctx = self.context(CompileScope::rebuild(), BuildMode::Make, data);
        operations::clean_forced_targets(&ctx)?;
        BuildDataManager::clean(&self.config.data_dir)?;
        Ok(())
    }

    fn context(&self, scope: CompileScope, mode: BuildMode, data: Arc<BuildDataManager>) -> CompileContext {
        CompileContext::new(
            &self.config,
            scope,
            mode,
            Arc::clone(&self.index),
            data,
            Arc::clone(&self.handler),
            self.cancel.clone(),
        )
    }

    /// Remove outputs registered by the previous build while its mappings
    /// still exist. Unreadable build data only leaves the outputs behind.
    fn clean_outputs_before_rebuild(&self, scope: &CompileScope) {
        let cleaned = BuildDataManager::open(&self.config.data_dir)
            .map_err(BuildError::from)
            .and_then(|data| {
                let ctx = self.context(scope.clone(), BuildMode::Rebuild, Arc::new(data));
                operations::clean_forced_targets(&ctx)
            });
        if let Err(e) = cleaned {
            warn!("Could not remove outputs of the previous build: {e}");
        }
    }

    async fn run_session(&self, scope: CompileScope, mode: BuildMode) -> BuildResult<()> {
        let started = Instant::now();
        if mode == BuildMode::Rebuild {
            self.clean_outputs_before_rebuild(&scope);
            BuildDataManager::clean(&self.config.data_dir)?;
        }
        let data = Arc::new(BuildDataManager::open(&self.config.data_dir)?);
        let ctx = Arc::new(self.context(scope, mode, Arc::clone(&data)));
        *self.current.lock() = Some(Arc::clone(&ctx));

        ctx.start();
        info!("Starting {mode:?} build of {} chunks", self.index.chunks().len());
        for builder in self.registry.all() {
            builder.build_started(&ctx);
        }

        let stats = Arc::new(BuilderStatistics::new());
        let result = match self.run_chunks(&ctx, &stats).await {
            Ok(()) if ctx.errors_detected() => Err(BuildError::CompilationErrors),
            other => other,
        };

        stats.report(&ctx);
        let unprocessed: Vec<TargetId> = self
            .index
            .targets()
            .map(|t| t.id.clone())
            .filter(|id| ctx.fs_state().has_unprocessed_changes(id))
            .collect();
        if !unprocessed.is_empty() {
            ctx.process_message(BuildMessage::UnprocessedChanges { targets: unprocessed });
        }
        for builder in self.registry.all() {
            builder.build_finished(&ctx);
        }

        if result.is_ok() {
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            for target in self.index.targets() {
                if ctx.scope().is_build_forced(&target.id) {
                    data.targets_state().set_last_rebuild_millis(&target.id, elapsed);
                }
            }
        }

        let flushed = data.flush();
        let result = match (result, flushed) {
            (Err(e), Err(flush_error)) => {
                warn!("Failed to save build data after failed build: {flush_error}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(flush_error)) => Err(flush_error.into()),
            (Ok(()), Ok(())) => Ok(()),
        };

        ctx.finish(&result);
        *self.current.lock() = None;
        match &result {
            Ok(()) => info!("Build finished in {:?}", started.elapsed()),
            Err(e) => info!("Build finished with {e} after {:?}", started.elapsed()),
        }
        result
    }

    async fn run_chunks(&self, ctx: &Arc<CompileContext>, stats: &Arc<BuilderStatistics>) -> BuildResult<()> {
        operations::clean_forced_targets(ctx)?;
        operations::clean_stale_targets(ctx)?;

        let chunks = self.index.chunks();
        let mut pending_dependencies: Vec<usize> = (0..chunks.len())
            .map(|chunk| self.index.chunk_dependencies(chunk).len())
            .collect();
        let mut dependents = vec![Vec::new(); chunks.len()];
        for chunk in 0..chunks.len() {
            for &dependency in self.index.chunk_dependencies(chunk) {
                dependents[dependency].push(chunk);
            }
        }
        let mut ready: VecDeque<usize> = (0..chunks.len())
            .filter(|&chunk| pending_dependencies[chunk] == 0)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
        let mut tasks = JoinSet::new();
        let mut first_error: Option<BuildError> = None;

        let mut release = |chunk: usize, ready: &mut VecDeque<usize>| {
            for &dependent in &dependents[chunk] {
                pending_dependencies[dependent] -= 1;
                if pending_dependencies[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        };

        loop {
            while first_error.is_none() && !ctx.errors_detected() && !ctx.cancel_status().is_canceled() {
                let Some(position) = ready.pop_front() else {
                    break;
                };
                let chunk = &chunks[position];
                if !chunk.targets().iter().any(|t| ctx.scope().is_affected(t)) {
                    debug!("Skipping unaffected chunk {}", chunk.name());
                    release(position, &mut ready);
                    continue;
                }

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| BuildError::internal("chunk scheduler", e))?;
                let ctx = Arc::clone(ctx);
                let registry = Arc::clone(&self.registry);
                let stats = Arc::clone(stats);
                let chunk = chunk.clone();
                let _ = tasks.spawn_blocking(move || {
                    let _permit = permit;
                    let result = pipeline::build_chunk(&ctx, &registry, &chunk, &stats);
                    (position, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok((position, Ok(()))) => release(position, &mut ready),
                Ok((_, Err(e))) => {
                    debug!("Chunk build failed: {e}");
                    let _ = first_error.get_or_insert(e);
                }
                Err(e) => {
                    let _ = first_error.get_or_insert(BuildError::internal("chunk scheduler", e));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        ctx.check_canceled()
    }
}
