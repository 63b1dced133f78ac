//! Chunk build pipeline: ordered builder passes over one chunk

use crate::builder::{BuilderCategory, BuilderRegistry, BuilderStatistics, DirtyFilesView, ExitCode};
use crate::context::{CompileContext, now_millis};
use crate::error::{BuildError, BuildResult};
use crate::message::{BuildMessage, TargetEvent};
use crate::operations;
use crate::output::ChunkOutputConsumer;
use crate::target_index::TargetChunk;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Build one chunk and commit its files if it succeeded.
pub(crate) fn build_chunk(
    ctx: &CompileContext,
    registry: &BuilderRegistry,
    chunk: &TargetChunk,
    stats: &BuilderStatistics,
) -> BuildResult<()> {
    if chunk.targets().len() > 1 && !chunk.is_module_based() {
        ctx.process_message(BuildMessage::error(
            "",
            format!(
                "Cannot build {}: circular dependencies are only supported between modules",
                chunk.name()
            ),
        ));
        return Ok(());
    }

    if chunk.contains_tests() {
        ctx.enter_tests();
    }
    ctx.process_message(BuildMessage::BuildingTarget {
        targets: chunk.targets().to_vec(),
        event: TargetEvent::Started,
    });

    let result = build_targets_chunk(ctx, registry, chunk, stats);

    ctx.process_message(BuildMessage::BuildingTarget {
        targets: chunk.targets().to_vec(),
        event: TargetEvent::Finished,
    });
    result
}

fn build_targets_chunk(
    ctx: &CompileContext,
    registry: &BuilderRegistry,
    chunk: &TargetChunk,
    stats: &BuilderStatistics,
) -> BuildResult<()> {
    let targets = chunk.targets();
    ctx.set_compilation_start(targets, now_millis());
    debug!("Building chunk {}", chunk.name());

    let result = run_chunk(ctx, registry, chunk, stats);

    // sources still pending removal were never committed; report them again next time
    for target in targets {
        for (scope, path) in ctx.take_removed_sources(target) {
            ctx.fs_state()
                .register_deleted(target, scope, &path, Some(ctx.data().timestamps()));
        }
    }

    result.map_err(|e| match e {
        BuildError::Stop { message } => {
            if let Some(text) = &message {
                ctx.process_message(BuildMessage::Progress { text: text.clone() });
            }
            BuildError::Stop { message }
        }
        e @ (BuildError::Cancelled | BuildError::RebuildRequested { .. } | BuildError::DataCorrupted(_)) => e,
        BuildError::Internal { context, source } => {
            ctx.process_message(BuildMessage::error(
                "",
                format!("Internal error while building {context}: {source}"),
            ));
            BuildError::Internal { context, source }
        }
        other => {
            ctx.process_message(BuildMessage::error(
                "",
                format!("Internal error while building {}: {other}", chunk.name()),
            ));
            BuildError::internal(chunk.name(), other)
        }
    })
}

fn run_chunk(
    ctx: &CompileContext,
    registry: &BuilderRegistry,
    chunk: &TargetChunk,
    stats: &BuilderStatistics,
) -> BuildResult<()> {
    let targets = chunk.targets();
    for id in targets {
        let target = ctx
            .index()
            .target(id)
            .ok_or_else(|| BuildError::internal(chunk.name(), format!("unknown target {id}")))?;
        operations::ensure_fs_state_initialized(ctx, target, false)?;
    }

    let mut done_something = operations::process_deleted_paths(ctx, chunk)?;

    ctx.fs_state().before_chunk_build_start(targets);
    let built = if chunk.is_module_based() {
        run_module_level_builders(ctx, registry, chunk, stats)
    } else {
        run_target_builders(ctx, registry, chunk, stats)
    };
    ctx.fs_state().end_round(targets);
    done_something |= built?;

    if done_something && operations::mark_targets_up_to_date(ctx, chunk)? {
        ctx.process_message(BuildMessage::DoneSomething);
    }
    Ok(())
}

fn run_target_builders(
    ctx: &CompileContext,
    registry: &BuilderRegistry,
    chunk: &TargetChunk,
    stats: &BuilderStatistics,
) -> BuildResult<bool> {
    let mut done_something = false;
    for id in chunk.targets() {
        let Some(target) = ctx.index().target(id) else {
            continue;
        };
        for category in BuilderCategory::ALL {
            for builder in registry.builders(category) {
                done_something |= operations::process_deleted_paths(ctx, chunk)?;
                match operations::build_target(ctx, target, builder.as_ref(), stats)? {
                    ExitCode::Abort => {
                        return Err(BuildError::stop(format!(
                            "Builder {} requested build stop",
                            builder.name()
                        )));
                    }
                    ExitCode::NothingDone => {}
                    _ => done_something = true,
                }
            }
        }
    }
    Ok(done_something)
}

fn run_module_level_builders(
    ctx: &CompileContext,
    registry: &BuilderRegistry,
    chunk: &TargetChunk,
    stats: &BuilderStatistics,
) -> BuildResult<bool> {
    let builders: Vec<_> = registry.all().cloned().collect();
    for builder in &builders {
        builder.chunk_build_started(ctx, chunk);
    }

    let result = run_passes(ctx, registry, chunk, stats);

    for builder in &builders {
        builder.chunk_build_finished(ctx, chunk);
    }
    result
}

fn run_passes(
    ctx: &CompileContext,
    registry: &BuilderRegistry,
    chunk: &TargetChunk,
    stats: &BuilderStatistics,
) -> BuildResult<bool> {
    let targets = chunk.targets();
    let forced = targets.iter().all(|t| ctx.scope().is_build_forced(t));

    if !forced {
        operations::complete_recompiled_sources_set(ctx, chunk)?;
    }

    let dirty = DirtyFilesView::new(ctx, chunk);
    let mut outputs = ChunkOutputConsumer::new(ctx, chunk);
    let mut done_something = false;
    let mut rebuild_from_scratch_requested = false;
    let mut first_pass = true;
    let mut pass = 0;

    loop {
        pass += 1;
        let mut next_pass_required = false;
        ctx.fs_state().begin_round(targets, first_pass);
        first_pass = false;

        if !ctx.is_project_rebuild() && !forced {
            let _ = operations::clean_outputs_corresponding_to_changed_files(ctx, chunk)?;
        }

        'categories: for category in BuilderCategory::ALL {
            for builder in registry.builders(category) {
                if !targets
                    .iter()
                    .filter_map(|id| ctx.index().target(id))
                    .any(|target| builder.supports(&target.kind))
                {
                    continue;
                }
                done_something |= operations::process_deleted_paths(ctx, chunk)?;
                outputs.set_current_builder(builder.name());

                let start = Instant::now();
                let result = builder.build(ctx, chunk, &dirty, &mut outputs);
                stats.record(builder.name(), start.elapsed(), outputs.take_processed_sources());
                let code = result?;
                outputs.fire_file_generated_events();

                match code {
                    ExitCode::NothingDone => {}
                    ExitCode::Ok => done_something = true,
                    ExitCode::Abort => {
                        return Err(BuildError::stop(format!(
                            "Builder {} requested build stop",
                            builder.name()
                        )));
                    }
                    ExitCode::AdditionalPassRequired => {
                        done_something = true;
                        next_pass_required = true;
                    }
                    ExitCode::ChunkRebuildRequired => {
                        done_something = true;
                        if !rebuild_from_scratch_requested && !forced {
                            info!(
                                "Builder {} requested rebuild of chunk {}",
                                builder.name(),
                                chunk.name()
                            );
                            rebuild_from_scratch_requested = true;
                            ctx.fs_state().end_round(targets);
                            for id in targets {
                                if let Some(target) = ctx.index().target(id) {
                                    let _ = operations::mark_dirty_files(ctx, target, true, None);
                                }
                                ctx.mark_non_incremental(id);
                            }
                            outputs.clear();
                            ctx.fs_state().before_chunk_build_start(targets);
                            first_pass = true;
                            next_pass_required = true;
                            ctx.check_canceled()?;
                            break 'categories;
                        }
                        if forced {
                            debug!(
                                "Builder {} requested rebuild of chunk {}, which is already built from scratch",
                                builder.name(),
                                chunk.name()
                            );
                        } else {
                            warn!(
                                "Builder {} requested a second rebuild of chunk {}, ignoring",
                                builder.name(),
                                chunk.name()
                            );
                        }
                    }
                }
                ctx.check_canceled()?;
            }
        }

        if !next_pass_required {
            break;
        }
        debug!("Chunk {} needs pass {}", chunk.name(), pass + 1);
    }

    Ok(done_something)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Builder, OutputConsumer};
    use crate::context::test_support::context;
    use crate::model::{BuildTarget, ProjectModel, TargetId, TargetKind};
    use crate::scope::{BuildMode, CompileScope};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recording(Mutex<Vec<&'static str>>);

    impl Builder for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn category(&self) -> BuilderCategory {
            BuilderCategory::Translator
        }

        fn chunk_build_started(&self, _ctx: &CompileContext, _chunk: &TargetChunk) {
            self.0.lock().push("chunk started");
        }

        fn chunk_build_finished(&self, _ctx: &CompileContext, _chunk: &TargetChunk) {
            self.0.lock().push("chunk finished");
        }

        fn build(
            &self,
            _ctx: &CompileContext,
            _chunk: &TargetChunk,
            _dirty: &DirtyFilesView<'_>,
            _output: &mut dyn OutputConsumer,
        ) -> BuildResult<ExitCode> {
            self.0.lock().push("build");
            Ok(ExitCode::NothingDone)
        }
    }

    #[test]
    fn test_chunk_hooks_wrap_builder_passes() {
        let model = ProjectModel::new(vec![BuildTarget::new("m", TargetKind::Production)]);
        let (_dir, handler, ctx) = context(model, CompileScope::all(), BuildMode::Make);
        let recording = Arc::new(Recording::default());
        let registry = BuilderRegistry::new().with(recording.clone());
        let chunk = ctx.index().chunk_of(&TargetId::new("m")).unwrap().clone();

        build_chunk(&ctx, &registry, &chunk, &BuilderStatistics::new()).unwrap();

        assert_eq!(*recording.0.lock(), vec!["chunk started", "build", "chunk finished"]);
        let messages = handler.messages();
        assert!(matches!(
            messages.first(),
            Some(BuildMessage::BuildingTarget { event: TargetEvent::Started, .. })
        ));
        assert!(matches!(
            messages.last(),
            Some(BuildMessage::BuildingTarget { event: TargetEvent::Finished, .. })
        ));
    }

    #[test]
    fn test_cycle_with_non_module_target_is_not_built() {
        let model = ProjectModel::new(vec![
            BuildTarget::new("a", TargetKind::Artifact).with_dependency("b"),
            BuildTarget::new("b", TargetKind::Production).with_dependency("a"),
        ]);
        let (_dir, handler, ctx) = context(model, CompileScope::all(), BuildMode::Make);
        let recording = Arc::new(Recording::default());
        let registry = BuilderRegistry::new().with(recording.clone());
        let chunk = ctx.index().chunk_of(&TargetId::new("a")).unwrap().clone();
        assert_eq!(chunk.targets().len(), 2);

        build_chunk(&ctx, &registry, &chunk, &BuilderStatistics::new()).unwrap();

        assert!(ctx.errors_detected());
        assert_eq!(handler.errors().len(), 1);
        assert!(recording.0.lock().is_empty());
    }

    struct RequestsRebuild;

    impl Builder for RequestsRebuild {
        fn name(&self) -> &str {
            "restarting"
        }

        fn category(&self) -> BuilderCategory {
            BuilderCategory::Translator
        }

        fn build(
            &self,
            _ctx: &CompileContext,
            _chunk: &TargetChunk,
            _dirty: &DirtyFilesView<'_>,
            _output: &mut dyn OutputConsumer,
        ) -> BuildResult<ExitCode> {
            Ok(ExitCode::ChunkRebuildRequired)
        }
    }

    #[traced_test]
    #[test]
    fn test_rebuild_request_in_forced_chunk_is_not_a_repeat() {
        let model = ProjectModel::new(vec![BuildTarget::new("m", TargetKind::Production)]);
        let (_dir, _handler, ctx) = context(model, CompileScope::all(), BuildMode::Rebuild);
        let registry = BuilderRegistry::new().with(Arc::new(RequestsRebuild));
        let chunk = ctx.index().chunk_of(&TargetId::new("m")).unwrap().clone();

        build_chunk(&ctx, &registry, &chunk, &BuilderStatistics::new()).unwrap();

        assert!(logs_contain("which is already built from scratch"));
        assert!(!logs_contain("second rebuild"));
    }
}
