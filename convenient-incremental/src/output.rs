//! Output consumers handed to builders

use crate::builder::{CompiledArtifact, OutputConsumer};
use crate::context::CompileContext;
use crate::error::{BuildError, BuildResult};
use crate::events::FsEvent;
use crate::message::BuildMessage;
use crate::model::TargetId;
use crate::storage::SourceToOutputMapping;
use crate::target_index::TargetChunk;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Records the outputs of one target into its source-to-output mapping.
///
/// The first registration of a source within the consumer's lifetime
/// replaces whatever the mapping held for it; later ones append.
pub struct BuildOutputConsumer {
    target: TargetId,
    mapping: Arc<SourceToOutputMapping>,
    registered_sources: HashSet<PathBuf>,
    generated: Vec<PathBuf>,
}

impl BuildOutputConsumer {
    pub fn new(target: TargetId, mapping: Arc<SourceToOutputMapping>) -> Self {
        Self {
            target,
            mapping,
            registered_sources: HashSet::new(),
            generated: Vec::new(),
        }
    }

    pub fn register_output(&mut self, output: &Path, sources: &[PathBuf]) {
        for source in sources {
            if self.registered_sources.insert(source.clone()) {
                self.mapping.set_outputs(source, [output.to_path_buf()]);
            } else {
                self.mapping.append_output(source, output);
            }
        }
        self.generated.push(output.to_path_buf());
    }

    /// Publish one aggregated event for everything registered since the last call.
    pub fn fire_files_generated(&mut self, ctx: &CompileContext) {
        if self.generated.is_empty() {
            return;
        }
        ctx.publish_event(FsEvent::FilesGenerated {
            source_target: self.target.clone(),
            paths: std::mem::take(&mut self.generated),
        });
    }
}

/// Output consumer for a whole chunk, spanning all builders of one chunk build.
pub struct ChunkOutputConsumer<'a> {
    ctx: &'a CompileContext,
    chunk: &'a TargetChunk,
    consumers: BTreeMap<TargetId, BuildOutputConsumer>,
    output_owners: HashMap<PathBuf, String>,
    current_builder: String,
    processed_sources: usize,
}

impl<'a> ChunkOutputConsumer<'a> {
    pub fn new(ctx: &'a CompileContext, chunk: &'a TargetChunk) -> Self {
        Self {
            ctx,
            chunk,
            consumers: BTreeMap::new(),
            output_owners: HashMap::new(),
            current_builder: String::new(),
            processed_sources: 0,
        }
    }

    pub fn set_current_builder(&mut self, name: &str) {
        self.current_builder = name.to_string();
    }

    fn consumer(&mut self, target: &TargetId) -> BuildResult<&mut BuildOutputConsumer> {
        if !self.chunk.contains(target) {
            return Err(BuildError::internal(
                self.chunk.name(),
                format!("builder {} registered output for foreign target {target}", self.current_builder),
            ));
        }
        if !self.consumers.contains_key(target) {
            let mapping = self.ctx.data().source_to_output(target)?;
            let _ = self
                .consumers
                .insert(target.clone(), BuildOutputConsumer::new(target.clone(), mapping));
        }
        self.consumers
            .get_mut(target)
            .ok_or_else(|| BuildError::internal(self.chunk.name(), "output consumer vanished"))
    }

    /// Number of sources registered through compiled artifacts since the last call.
    pub fn take_processed_sources(&mut self) -> usize {
        std::mem::take(&mut self.processed_sources)
    }

    /// Publish the outputs registered by the last builder and apply their propagation.
    pub fn fire_file_generated_events(&mut self) {
        for consumer in self.consumers.values_mut() {
            consumer.fire_files_generated(self.ctx);
        }
        self.ctx.drain_events();
    }

    /// Forget everything registered so far; used when the chunk restarts from scratch.
    pub fn clear(&mut self) {
        self.consumers.clear();
        self.output_owners.clear();
        self.processed_sources = 0;
    }
}

impl OutputConsumer for ChunkOutputConsumer<'_> {
    fn register_output(&mut self, target: &TargetId, output: &Path, sources: &[PathBuf]) -> BuildResult<()> {
        let builder = self.current_builder.clone();
        match self.output_owners.get(output) {
            Some(owner) if owner != &builder => {
                self.ctx.process_message(
                    BuildMessage::error(
                        builder.clone(),
                        format!(
                            "Output file \"{}\" has already been registered by \"{owner}\"",
                            output.display()
                        ),
                    )
                    .with_source(output),
                );
            }
            Some(_) => {}
            None => {
                let _ = self.output_owners.insert(output.to_path_buf(), builder);
            }
        }
        self.consumer(target)?.register_output(output, sources);
        Ok(())
    }

    fn register_compiled_artifact(&mut self, artifact: CompiledArtifact) -> BuildResult<()> {
        self.register_output(&artifact.target, &artifact.output, &artifact.sources)?;
        self.processed_sources += artifact.sources.len();
        Ok(())
    }
}
