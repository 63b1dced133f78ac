//! Builder contract and registry
//!
//! A builder is a plug-in that compiles, copies or checks files of a chunk.
//! It declares the pipeline category it runs in and the target kinds it
//! handles; the orchestrator decides when it runs and what it sees.

use crate::context::CompileContext;
use crate::error::BuildResult;
use crate::message::BuildMessage;
use crate::model::{SourceScope, TargetId, TargetKind};
use crate::target_index::{RootDescriptor, TargetChunk};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Result of one builder invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Nothing to do for this chunk
    NothingDone,
    Ok,
    /// Stop building the chunk
    Abort,
    /// Run every category once more; files marked meanwhile are visible then
    AdditionalPassRequired,
    /// Incremental assumptions broke: rebuild the chunk from scratch
    ChunkRebuildRequired,
}

/// Pipeline stage of a builder, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuilderCategory {
    SourceGenerator,
    SourceInstrumenter,
    Translator,
    ResourceProcessor,
    ClassPostProcessor,
    Packager,
    Validator,
}

impl BuilderCategory {
    pub const ALL: [BuilderCategory; 7] = [
        BuilderCategory::SourceGenerator,
        BuilderCategory::SourceInstrumenter,
        BuilderCategory::Translator,
        BuilderCategory::ResourceProcessor,
        BuilderCategory::ClassPostProcessor,
        BuilderCategory::Packager,
        BuilderCategory::Validator,
    ];
}

/// An output produced from a set of sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub target: TargetId,
    pub output: PathBuf,
    pub sources: Vec<PathBuf>,
}

/// Sink for the outputs a builder produces.
pub trait OutputConsumer {
    /// Record that `output` of `target` was produced from `sources`.
    fn register_output(&mut self, target: &TargetId, output: &Path, sources: &[PathBuf]) -> BuildResult<()>;

    /// Record a compiled artifact; counts towards the processed sources of the builder.
    fn register_compiled_artifact(&mut self, artifact: CompiledArtifact) -> BuildResult<()>;
}

/// Pluggable build step.
pub trait Builder: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> BuilderCategory;

    /// Target kinds this builder handles. Module-based kinds by default.
    fn supports(&self, kind: &TargetKind) -> bool {
        kind.is_module_based()
    }

    fn build_started(&self, _ctx: &CompileContext) {}

    fn build_finished(&self, _ctx: &CompileContext) {}

    fn chunk_build_started(&self, _ctx: &CompileContext, _chunk: &TargetChunk) {}

    fn chunk_build_finished(&self, _ctx: &CompileContext, _chunk: &TargetChunk) {}

    /// Build the dirty files of `chunk`.
    ///
    /// Returning an error aborts the chunk. Reporting an error message
    /// through the context lets the pipeline continue but prevents any
    /// commit.
    fn build(
        &self,
        ctx: &CompileContext,
        chunk: &TargetChunk,
        dirty: &DirtyFilesView<'_>,
        output: &mut dyn OutputConsumer,
    ) -> BuildResult<ExitCode>;
}

/// Builders of a session, grouped by category.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: BTreeMap<BuilderCategory, Vec<Arc<dyn Builder>>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, builder: Arc<dyn Builder>) {
        self.builders.entry(builder.category()).or_default().push(builder);
    }

    pub fn with(mut self, builder: Arc<dyn Builder>) -> Self {
        self.register(builder);
        self
    }

    pub fn builders(&self, category: BuilderCategory) -> &[Arc<dyn Builder>] {
        self.builders.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every builder in pipeline order.
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Builder>> {
        self.builders.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.values().all(Vec::is_empty)
    }
}

/// Dirty files of a chunk as seen by the current pass.
pub struct DirtyFilesView<'a> {
    ctx: &'a CompileContext,
    chunk: &'a TargetChunk,
}

impl<'a> DirtyFilesView<'a> {
    pub fn new(ctx: &'a CompileContext, chunk: &'a TargetChunk) -> Self {
        Self { ctx, chunk }
    }

    /// Visit every affected dirty file. Returns `false` if the visitor stopped early.
    pub fn process_dirty_files(&self, mut visitor: impl FnMut(&TargetId, &RootDescriptor, &Path) -> bool) -> bool {
        for target in self.chunk.targets() {
            for scope in SourceScope::ALL {
                let completed = self
                    .ctx
                    .fs_state()
                    .process_files_to_recompile(target, scope, |root, file| {
                        if !self.ctx.scope().is_file_affected(target, file) {
                            return true;
                        }
                        visitor(target, root, file)
                    });
                if !completed {
                    return false;
                }
            }
        }
        true
    }

    pub fn dirty_files(&self) -> Vec<(RootDescriptor, PathBuf)> {
        let mut files = Vec::new();
        let _ = self.process_dirty_files(|_, root, file| {
            files.push((root.clone(), file.to_path_buf()));
            true
        });
        files
    }

    pub fn has_dirty_files(&self) -> bool {
        !self.process_dirty_files(|_, _, _| false)
    }

    /// Sources of `target` deleted since its last build.
    pub fn removed_files(&self, target: &TargetId) -> Vec<PathBuf> {
        self.ctx.removed_sources(target)
    }
}

/// Accumulated time and processed sources per builder over a session.
#[derive(Debug, Default)]
pub struct BuilderStatistics {
    entries: Mutex<BTreeMap<String, (Duration, usize)>>,
}

impl BuilderStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, builder: &str, elapsed: Duration, processed_sources: usize) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(builder.to_string()).or_default();
        entry.0 += elapsed;
        entry.1 += processed_sources;
    }

    pub fn get(&self, builder: &str) -> Option<(Duration, usize)> {
        self.entries.lock().get(builder).copied()
    }

    /// Send one statistics message per builder that ran.
    pub fn report(&self, ctx: &CompileContext) {
        let entries = self.entries.lock().clone();
        for (builder, (elapsed, processed_sources)) in entries {
            ctx.process_message(BuildMessage::BuilderStatistics {
                builder,
                elapsed,
                processed_sources,
            });
        }
    }
}
