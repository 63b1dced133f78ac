//! Build operations over the dirty state, stamps and output mappings
//!
//! These are stateless procedures: everything they touch lives in the
//! [`CompileContext`].

use crate::builder::{Builder, BuilderStatistics, DirtyFilesView, ExitCode};
use crate::context::CompileContext;
use crate::error::{BuildError, BuildResult};
use crate::events::FsEvent;
use crate::fs_state::CompilationRound;
use crate::model::{BuildTarget, SourceScope, TargetId};
use crate::output::ChunkOutputConsumer;
use crate::storage::last_modified;
use crate::target_index::TargetChunk;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Bring the dirty state of `target` up to date before its chunk builds.
///
/// With `read_only`, nothing durable is written: fingerprints are not saved
/// and outputs are not cleared.
pub fn ensure_fs_state_initialized(ctx: &CompileContext, target: &BuildTarget, read_only: bool) -> BuildResult<()> {
    let fs_state = ctx.fs_state();
    let targets_state = ctx.data().targets_state();
    let fingerprint = target.configuration_fingerprint();

    if ctx.is_project_rebuild() {
        let _ = mark_dirty_files(ctx, target, true, None);
        fs_state.mark_initial_scan_performed(&target.id);
        if !read_only {
            targets_state.save_fingerprint(&target.id, &fingerprint);
        }
    } else if ctx.scope().is_build_forced(&target.id) || targets_state.is_changed(&target.id, &fingerprint) {
        debug!("Target {} is forced or its configuration changed, marking all files dirty", target.id);
        if target.kind.is_module_based() {
            init_target_fs_state(ctx, target, true)?;
        } else {
            if !read_only {
                clear_output_files(ctx, target)?;
            }
            let _ = mark_dirty_files(ctx, target, true, None);
            fs_state.mark_initial_scan_performed(&target.id);
        }
        if !read_only {
            targets_state.save_fingerprint(&target.id, &fingerprint);
        }
    } else if !fs_state.is_initial_scan_performed(&target.id) {
        init_target_fs_state(ctx, target, false)?;
    }
    Ok(())
}

/// Scan the roots of `target` and register every mapped source that no
/// longer exists as deleted.
pub fn init_target_fs_state(ctx: &CompileContext, target: &BuildTarget, force: bool) -> BuildResult<()> {
    let mut current_files = HashSet::new();
    let marked = mark_dirty_files(ctx, target, force, Some(&mut current_files));

    let fs_state = ctx.fs_state();
    fs_state.clear_deleted_paths(&target.id);
    let mapping = ctx.data().source_to_output(&target.id)?;
    let mut deleted = 0;
    for source in mapping.sources() {
        if !current_files.contains(&source) {
            let scope = scope_of_source(ctx, target, &source);
            fs_state.register_deleted(&target.id, scope, &source, Some(ctx.data().timestamps()));
            deleted += 1;
        }
    }
    fs_state.mark_initial_scan_performed(&target.id);
    debug!(
        "Initial scan of {}: {} dirty, {} deleted of {} files",
        target.id,
        marked,
        deleted,
        current_files.len()
    );
    Ok(())
}

fn scope_of_source(ctx: &CompileContext, target: &BuildTarget, source: &Path) -> SourceScope {
    ctx.index()
        .roots()
        .find_parent_descriptor(source, &target.id)
        .map_or_else(|| SourceScope::from_tests(target.kind.is_tests()), |rd| rd.scope)
}

/// Walk the roots of `target` and mark files dirty whose stamp differs
/// from the committed one, or every file with `force`.
///
/// Every file seen is added to `current_files`. Returns the number of newly
/// marked files.
pub fn mark_dirty_files(
    ctx: &CompileContext,
    target: &BuildTarget,
    force: bool,
    mut current_files: Option<&mut HashSet<PathBuf>>,
) -> usize {
    let roots = ctx.index().roots();
    let stamps = ctx.data().timestamps();
    let mut marked = 0;

    for descriptor in roots.target_roots(&target.id) {
        if !descriptor.root.is_dir() {
            continue;
        }
        let walker = WalkDir::new(&descriptor.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !roots.is_excluded(&target.id, entry.path()))
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file());

        for entry in walker {
            let file = entry.path();
            // files of a nested root belong to that root
            if roots
                .find_parent_descriptor(file, &target.id)
                .is_some_and(|deepest| deepest.root != descriptor.root)
            {
                continue;
            }
            if let Some(current) = current_files.as_deref_mut() {
                let _ = current.insert(file.to_path_buf());
            }
            if !ctx.scope().is_file_affected(&target.id, file) {
                continue;
            }
            if (force || stamps.is_dirty(&target.id, file, last_modified(file)))
                && ctx
                    .fs_state()
                    .mark_dirty(CompilationRound::Current, descriptor, file, Some(stamps))
            {
                marked += 1;
            }
        }
    }
    marked
}

/// Run one builder over a single target and publish what it generated.
pub fn build_target(
    ctx: &CompileContext,
    target: &BuildTarget,
    builder: &dyn Builder,
    stats: &BuilderStatistics,
) -> BuildResult<ExitCode> {
    if !builder.supports(&target.kind) {
        return Ok(ExitCode::NothingDone);
    }
    let chunk = ctx
        .index()
        .chunk_of(&target.id)
        .ok_or_else(|| BuildError::internal(target.id.to_string(), "target is not part of the index"))?;

    let dirty = DirtyFilesView::new(ctx, chunk);
    let mut outputs = ChunkOutputConsumer::new(ctx, chunk);
    outputs.set_current_builder(builder.name());

    let start = Instant::now();
    let result = builder.build(ctx, chunk, &dirty, &mut outputs);
    stats.record(builder.name(), start.elapsed(), outputs.take_processed_sources());
    let code = result?;

    outputs.fire_file_generated_events();
    ctx.check_canceled()?;
    Ok(code)
}

/// Commit the dirty files of `chunk` as compiled.
///
/// Nothing is committed once an error was reported or the session was
/// cancelled. A file modified after the chunk started compiling stays
/// dirty. Returns whether any stamp was written.
pub fn mark_targets_up_to_date(ctx: &CompileContext, chunk: &TargetChunk) -> BuildResult<bool> {
    if ctx.errors_detected() || ctx.cancel_status().is_canceled() {
        return Ok(false);
    }

    let fs_state = ctx.fs_state();
    let stamps = ctx.data().timestamps();
    let roots = ctx.index().roots();
    let mut marked = false;

    for target in chunk.targets() {
        let compilation_start = ctx.compilation_start(target);
        for descriptor in roots.target_roots(target) {
            let Some(files) = fs_state.clear_recompile(descriptor) else {
                continue;
            };
            for file in files {
                if roots.is_excluded(target, &file) {
                    stamps.remove_stamp(target, &file);
                    continue;
                }
                if !ctx.scope().is_file_affected(target, &file) {
                    let _ = fs_state.mark_dirty(CompilationRound::Current, descriptor, &file, None);
                    continue;
                }
                let Some(stamp) = last_modified(&file) else {
                    stamps.remove_stamp(target, &file);
                    continue;
                };
                let changed_during_build = stamp > compilation_start
                    || fs_state
                        .event_registration_stamp(&file)
                        .is_some_and(|event| event >= compilation_start);
                if !descriptor.generated && changed_during_build {
                    if ctx.is_test_mode() {
                        info!("Timestamp after compilation started; marking dirty again: {}", file.display());
                    } else {
                        debug!("{} changed during compilation, keeping it dirty", file.display());
                    }
                    let _ = fs_state.mark_dirty(CompilationRound::Current, descriptor, &file, None);
                } else {
                    stamps.save_stamp(target, &file, stamp);
                    marked = true;
                }
            }
        }
        drop_removed_paths(ctx, target)?;
        ctx.clear_non_incremental_mark(target);
    }
    Ok(marked)
}

/// Forget the mapping entries of sources deleted before this build.
pub fn drop_removed_paths(ctx: &CompileContext, target: &TargetId) -> BuildResult<()> {
    let removed = ctx.take_removed_sources(target);
    if removed.is_empty() {
        return Ok(());
    }
    let mapping = ctx.data().source_to_output(target)?;
    for (_, source) in removed {
        mapping.remove(&source);
    }
    Ok(())
}

/// Delete the outputs of every deleted source of the chunk.
///
/// Outputs still produced by a surviving source stay. Removed sources are
/// handed to builders through the context. Returns whether there was
/// anything to process.
pub fn process_deleted_paths(ctx: &CompileContext, chunk: &TargetChunk) -> BuildResult<bool> {
    let fs_state = ctx.fs_state();
    let mut done_something = false;
    let mut deleted_outputs = Vec::new();

    for target in chunk.targets() {
        let removed: Vec<(SourceScope, PathBuf)> = SourceScope::ALL
            .into_iter()
            .flat_map(|scope| {
                fs_state
                    .get_and_clear_deleted_paths(target, scope)
                    .into_iter()
                    .map(move |path| (scope, path))
            })
            .collect();
        if removed.is_empty() {
            continue;
        }

        let mapping = ctx.data().source_to_output(target)?;
        let output_sources = mapping.output_to_sources();
        let removed_paths: HashSet<&PathBuf> = removed.iter().map(|(_, path)| path).collect();
        for (_, source) in &removed {
            for output in mapping.outputs(source) {
                let still_produced = output_sources
                    .get(&output)
                    .is_some_and(|sources| sources.iter().any(|s| !removed_paths.contains(s)));
                if still_produced {
                    continue;
                }
                if let Err(e) = delete_recursively(&output, &mut deleted_outputs) {
                    warn!("Failed to delete output {}: {e}", output.display());
                }
            }
        }
        debug!("{} sources of {target} were deleted", removed.len());
        ctx.add_removed_sources(target, removed);
        done_something = true;
    }

    if !deleted_outputs.is_empty() {
        ctx.publish_event(FsEvent::FilesDeleted { paths: deleted_outputs });
        ctx.drain_events();
    }
    Ok(done_something)
}

/// Mark every source sharing an output with a dirty source dirty as well.
pub fn complete_recompiled_sources_set(ctx: &CompileContext, chunk: &TargetChunk) -> BuildResult<()> {
    let fs_state = ctx.fs_state();
    let roots = ctx.index().roots();

    for target in chunk.targets() {
        let dirty: HashSet<PathBuf> = fs_state.dirty_files(target).into_iter().collect();
        if dirty.is_empty() {
            continue;
        }
        let mapping = ctx.data().source_to_output(target)?;
        for sources in mapping.output_to_sources().values() {
            if sources.len() < 2 || !sources.iter().any(|s| dirty.contains(s)) {
                continue;
            }
            for source in sources.iter().filter(|s| !dirty.contains(*s)) {
                if let Some(descriptor) = roots.find_parent_descriptor(source, target)
                    && source.is_file()
                    && fs_state.mark_dirty_if_not_deleted(
                        CompilationRound::Current,
                        descriptor,
                        source,
                        Some(ctx.data().timestamps()),
                    )
                {
                    debug!("{} shares an output with a changed file", source.display());
                }
            }
        }
    }
    Ok(())
}

/// Delete the registered outputs of the files the current pass will recompile.
///
/// Outputs that cannot be deleted stay in the mapping. Returns the number of
/// deleted files.
pub fn clean_outputs_corresponding_to_changed_files(ctx: &CompileContext, chunk: &TargetChunk) -> BuildResult<usize> {
    let mut deleted_outputs = Vec::new();

    for target in chunk.targets() {
        let mapping = ctx.data().source_to_output(target)?;
        let mut dirty = Vec::new();
        for scope in SourceScope::ALL {
            let _ = ctx.fs_state().process_files_to_recompile(target, scope, |_, file| {
                dirty.push(file.to_path_buf());
                true
            });
        }

        for source in dirty {
            let outputs = mapping.outputs(&source);
            if outputs.is_empty() {
                continue;
            }
            let mut kept = Vec::new();
            for output in outputs {
                if let Err(e) = delete_recursively(&output, &mut deleted_outputs) {
                    warn!("Failed to delete output {}: {e}", output.display());
                    kept.push(output);
                }
            }
            mapping.set_outputs(&source, kept);
        }
    }

    let count = deleted_outputs.len();
    if count > 0 {
        ctx.publish_event(FsEvent::FilesDeleted { paths: deleted_outputs });
        ctx.drain_events();
    }
    Ok(count)
}

/// Delete the registered outputs of `target` and clear its mapping.
pub fn clear_output_files(ctx: &CompileContext, target: &BuildTarget) -> BuildResult<()> {
    let mapping = ctx.data().source_to_output(&target.id)?;
    let mut deleted = Vec::new();
    for source in mapping.sources() {
        for output in mapping.outputs(&source) {
            if let Err(e) = delete_recursively(&output, &mut deleted) {
                warn!("Failed to delete output {}: {e}", output.display());
            }
        }
    }
    mapping.clear();

    if !deleted.is_empty() {
        debug!("Cleared {} outputs of {}", deleted.len(), target.id);
        ctx.publish_event(FsEvent::FilesDeleted { paths: deleted });
        ctx.drain_events();
    }
    Ok(())
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Remove the outputs of forced targets before anything builds.
///
/// An output root is wiped entirely only if it overlaps no source root and
/// every target writing into it is forced; otherwise only the registered
/// outputs go.
pub fn clean_forced_targets(ctx: &CompileContext) -> BuildResult<()> {
    let index = ctx.index();
    let source_roots: Vec<&Path> = index
        .targets()
        .flat_map(|t| t.roots.iter().map(|r| r.path.as_path()))
        .collect();

    for target in index.targets() {
        if !ctx.scope().is_build_forced(&target.id) {
            continue;
        }
        let mut deleted = Vec::new();
        for output_root in &target.outputs {
            if source_roots.iter().any(|root| overlaps(root, output_root)) {
                continue;
            }
            let shared_with_unforced = index.targets().any(|other| {
                !ctx.scope().is_build_forced(&other.id)
                    && other.outputs.iter().any(|root| overlaps(root, output_root))
            });
            if shared_with_unforced {
                debug!(
                    "Output root {} of {} is shared with a target built incrementally, keeping it",
                    output_root.display(),
                    target.id
                );
                continue;
            }
            if let Err(e) = delete_recursively(output_root, &mut deleted) {
                warn!("Failed to clean output root {}: {e}", output_root.display());
            }
        }
        clear_output_files(ctx, target)?;
        ctx.data().clean_target_storages(&target.id)?;
        if !deleted.is_empty() {
            info!("Cleaned {} files from output roots of {}", deleted.len(), target.id);
            ctx.publish_event(FsEvent::FilesDeleted { paths: deleted });
            ctx.drain_events();
        }
    }
    Ok(())
}

/// Delete outputs and build data of targets that left the project.
pub fn clean_stale_targets(ctx: &CompileContext) -> BuildResult<()> {
    let current: HashSet<TargetId> = ctx.index().targets().map(|t| t.id.clone()).collect();
    let data = ctx.data();
    for stale in data.targets_state().stale_targets(&current) {
        info!("Cleaning output files of stale target {stale}");
        let mapping = data.source_to_output(&stale)?;
        let mut deleted = Vec::new();
        for source in mapping.sources() {
            for output in mapping.outputs(&source) {
                if let Err(e) = delete_recursively(&output, &mut deleted) {
                    warn!("Failed to delete output {}: {e}", output.display());
                }
            }
        }
        data.remove_target_data(&stale)?;
        if !deleted.is_empty() {
            ctx.publish_event(FsEvent::FilesDeleted { paths: deleted });
            ctx.drain_events();
        }
    }
    Ok(())
}

/// Delete a file or directory tree, recording every deleted file.
/// A missing path is not an error.
pub fn delete_recursively(path: &Path, deleted: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        let files: Vec<PathBuf> = WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| !entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect();
        fs::remove_dir_all(path)?;
        deleted.extend(files);
    } else {
        fs::remove_file(path)?;
        deleted.push(path.to_path_buf());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::message::BuildMessage;
    use crate::model::{ProjectModel, SourceRoot, TargetKind};
    use crate::scope::{BuildMode, CompileScope};
    use filetime::{FileTime, set_file_mtime};
    use std::path::Path;
    use tracing_test::traced_test;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn project(root: &Path) -> ProjectModel {
        ProjectModel::new(vec![
            BuildTarget::new("m", TargetKind::Production)
                .with_root(SourceRoot::new(root.join("src")))
                .with_exclude(root.join("src/excluded"))
                .with_output(root.join("out")),
        ])
    }

    fn target(ctx: &CompileContext) -> BuildTarget {
        ctx.index().target(&TargetId::new("m")).unwrap().clone()
    }

    #[test]
    fn test_initial_scan_compares_stamps() {
        let sources = tempfile::TempDir::new().unwrap();
        let root = sources.path();
        write(&root.join("src/A.java"), "class A {}");
        write(&root.join("src/B.java"), "class B {}");
        write(&root.join("src/excluded/C.java"), "class C {}");

        let (_dir, _handler, ctx) = context(project(root), CompileScope::all(), BuildMode::Make);
        let m = TargetId::new("m");
        let stamps = ctx.data().timestamps();
        stamps.save_stamp(&m, &root.join("src/A.java"), last_modified(&root.join("src/A.java")).unwrap());
        ctx.data().targets_state().save_fingerprint(&m, &target(&ctx).configuration_fingerprint());

        ensure_fs_state_initialized(&ctx, &target(&ctx), false).unwrap();

        assert_eq!(ctx.fs_state().dirty_files(&m), vec![root.join("src/B.java")]);
        assert!(ctx.fs_state().is_initial_scan_performed(&m));
    }

    #[test]
    fn test_changed_fingerprint_marks_everything() {
        let sources = tempfile::TempDir::new().unwrap();
        let root = sources.path();
        write(&root.join("src/A.java"), "class A {}");

        let (_dir, _handler, ctx) = context(project(root), CompileScope::all(), BuildMode::Make);
        let m = TargetId::new("m");
        ctx.data().timestamps().save_stamp(&m, &root.join("src/A.java"), last_modified(&root.join("src/A.java")).unwrap());
        ctx.data().targets_state().save_fingerprint(&m, "outdated");

        ensure_fs_state_initialized(&ctx, &target(&ctx), false).unwrap();

        assert_eq!(ctx.fs_state().dirty_files(&m), vec![root.join("src/A.java")]);
        assert!(!ctx.data().targets_state().is_changed(&m, &target(&ctx).configuration_fingerprint()));
    }

    #[test]
    fn test_missing_mapped_source_is_registered_deleted() {
        let sources = tempfile::TempDir::new().unwrap();
        let root = sources.path();
        write(&root.join("src/A.java"), "class A {}");

        let (_dir, _handler, ctx) = context(project(root), CompileScope::all(), BuildMode::Make);
        let m = TargetId::new("m");
        ctx.data().targets_state().save_fingerprint(&m, &target(&ctx).configuration_fingerprint());
        ctx.data()
            .source_to_output(&m)
            .unwrap()
            .set_outputs(&root.join("src/Gone.java"), [root.join("out/Gone.class")]);

        ensure_fs_state_initialized(&ctx, &target(&ctx), false).unwrap();
        assert_eq!(ctx.fs_state().deleted_paths(&m), vec![root.join("src/Gone.java")]);
    }

    #[traced_test]
    #[test]
    fn test_commit_keeps_files_modified_during_build() {
        let sources = tempfile::TempDir::new().unwrap();
        let root = sources.path();
        write(&root.join("src/A.java"), "class A {}");
        write(&root.join("src/B.java"), "class B {}");
        let (_dir, handler, ctx) = context(project(root), CompileScope::all(), BuildMode::Make);
        let m = TargetId::new("m");

        ensure_fs_state_initialized(&ctx, &target(&ctx), false).unwrap();
        let chunk = ctx.index().chunk_of(&m).unwrap().clone();
        let start = last_modified(&root.join("src/A.java")).unwrap() + 1_000;
        ctx.set_compilation_start(chunk.targets(), start);
        set_file_mtime(root.join("src/B.java"), FileTime::from_unix_time(start / 1000 + 60, 0)).unwrap();

        assert!(mark_targets_up_to_date(&ctx, &chunk).unwrap());

        let stamps = ctx.data().timestamps();
        assert!(stamps.stamp(&m, &root.join("src/A.java")).is_some());
        assert!(stamps.stamp(&m, &root.join("src/B.java")).is_none());
        assert_eq!(ctx.fs_state().dirty_files(&m), vec![root.join("src/B.java")]);
        assert!(handler.errors().is_empty());
        assert!(logs_contain("marking dirty again"));
    }

    #[test]
    fn test_commit_skipped_after_error() {
        let sources = tempfile::TempDir::new().unwrap();
        let root = sources.path();
        write(&root.join("src/A.java"), "class A {}");
        let (_dir, _handler, ctx) = context(project(root), CompileScope::all(), BuildMode::Make);
        let m = TargetId::new("m");

        ensure_fs_state_initialized(&ctx, &target(&ctx), false).unwrap();
        let chunk = ctx.index().chunk_of(&m).unwrap().clone();
        ctx.set_compilation_start(chunk.targets(), i64::MAX);
        ctx.process_message(BuildMessage::error("javac", "broken"));

        assert!(!mark_targets_up_to_date(&ctx, &chunk).unwrap());
        assert_eq!(ctx.data().timestamps().stamp_count(&m), 0);
        assert_eq!(ctx.fs_state().dirty_files(&m).len(), 1);
    }

    #[test]
    fn test_deleted_source_outputs_removed_unless_shared() {
        let sources = tempfile::TempDir::new().unwrap();
        let root = sources.path();
        write(&root.join("src/Keep.java"), "class Keep {}");
        write(&root.join("out/Gone.class"), "x");
        write(&root.join("out/lib.jar"), "x");

        let (_dir, handler, ctx) = context(project(root), CompileScope::all(), BuildMode::Make);
        let m = TargetId::new("m");
        let mapping = ctx.data().source_to_output(&m).unwrap();
        mapping.set_outputs(&root.join("src/Gone.java"), [root.join("out/Gone.class"), root.join("out/lib.jar")]);
        mapping.set_outputs(&root.join("src/Keep.java"), [root.join("out/lib.jar")]);
        ctx.fs_state()
            .register_deleted(&m, SourceScope::Production, &root.join("src/Gone.java"), None);

        let chunk = ctx.index().chunk_of(&m).unwrap().clone();
        assert!(process_deleted_paths(&ctx, &chunk).unwrap());

        assert!(!root.join("out/Gone.class").exists());
        assert!(root.join("out/lib.jar").exists());
        assert_eq!(ctx.removed_sources(&m), vec![root.join("src/Gone.java")]);
        assert!(handler.messages().iter().any(|m| matches!(m, BuildMessage::FilesDeleted { .. })));

        drop_removed_paths(&ctx, &m).unwrap();
        assert!(mapping.outputs(&root.join("src/Gone.java")).is_empty());
        assert!(!process_deleted_paths(&ctx, &chunk).unwrap());
    }

    #[test]
    fn test_shared_output_pulls_in_sibling_sources() {
        let sources = tempfile::TempDir::new().unwrap();
        let root = sources.path();
        write(&root.join("src/A.java"), "class A {}");
        write(&root.join("src/B.java"), "class B {}");
        let (_dir, _handler, ctx) = context(project(root), CompileScope::all(), BuildMode::Make);
        let m = TargetId::new("m");
        let mapping = ctx.data().source_to_output(&m).unwrap();
        mapping.set_outputs(&root.join("src/A.java"), [root.join("out/ab.jar")]);
        mapping.set_outputs(&root.join("src/B.java"), [root.join("out/ab.jar")]);

        let descriptor = ctx.index().roots().target_roots(&m)[0].clone();
        let _ = ctx
            .fs_state()
            .mark_dirty(CompilationRound::Current, &descriptor, &root.join("src/A.java"), None);

        let chunk = ctx.index().chunk_of(&m).unwrap().clone();
        complete_recompiled_sources_set(&ctx, &chunk).unwrap();
        assert_eq!(ctx.fs_state().dirty_files(&m).len(), 2);
    }

    #[test]
    fn test_outputs_of_changed_files_are_cleaned() {
        let sources = tempfile::TempDir::new().unwrap();
        let root = sources.path();
        write(&root.join("src/A.java"), "class A {}");
        write(&root.join("out/A.class"), "x");
        let (_dir, _handler, ctx) = context(project(root), CompileScope::all(), BuildMode::Make);
        let m = TargetId::new("m");
        let mapping = ctx.data().source_to_output(&m).unwrap();
        mapping.set_outputs(&root.join("src/A.java"), [root.join("out/A.class")]);

        let descriptor = ctx.index().roots().target_roots(&m)[0].clone();
        let _ = ctx
            .fs_state()
            .mark_dirty(CompilationRound::Current, &descriptor, &root.join("src/A.java"), None);
        let chunk = ctx.index().chunk_of(&m).unwrap().clone();

        assert_eq!(clean_outputs_corresponding_to_changed_files(&ctx, &chunk).unwrap(), 1);
        assert!(!root.join("out/A.class").exists());
        assert!(mapping.sources().is_empty());
    }

    #[test]
    fn test_forced_target_output_root_is_wiped() {
        let sources = tempfile::TempDir::new().unwrap();
        let root = sources.path();
        write(&root.join("out/nested/Old.class"), "x");
        let scope = CompileScope::all().force([TargetId::new("m")]);
        let (_dir, _handler, ctx) = context(project(root), scope, BuildMode::Make);

        clean_forced_targets(&ctx).unwrap();
        assert!(!root.join("out").exists());
    }

    #[test]
    fn test_delete_recursively_reports_files() {
        let dir = tempfile::TempDir::new().unwrap();
        write(&dir.path().join("a/b/c.txt"), "c");
        write(&dir.path().join("a/d.txt"), "d");
        let mut deleted = Vec::new();
        delete_recursively(&dir.path().join("a"), &mut deleted).unwrap();
        deleted.sort();
        assert_eq!(deleted, vec![dir.path().join("a/b/c.txt"), dir.path().join("a/d.txt")]);
        delete_recursively(&dir.path().join("missing"), &mut deleted).unwrap();
    }
}
