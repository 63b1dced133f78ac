//! Built-in builder copying source files into the first output root

use convenient_incremental::{
    BuildMessage, BuildResult, Builder, BuilderCategory, CompileContext, CompiledArtifact, DirtyFilesView,
    ExitCode, MessageKind, OutputConsumer, RootDescriptor, TargetChunk, TargetId, TargetKind,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copies every dirty file to the same relative path below the target's
/// first output root.
pub struct CopyBuilder;

const NAME: &str = "copy";

impl CopyBuilder {
    fn destination(ctx: &CompileContext, target: &TargetId, root: &RootDescriptor, file: &Path) -> Option<PathBuf> {
        let output_root = ctx.index().target(target)?.outputs.first()?;
        let relative = file.strip_prefix(&root.root).ok()?;
        Some(output_root.join(relative))
    }
}

impl Builder for CopyBuilder {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> BuilderCategory {
        BuilderCategory::ResourceProcessor
    }

    fn supports(&self, _kind: &TargetKind) -> bool {
        true
    }

    fn build(
        &self,
        ctx: &CompileContext,
        _chunk: &TargetChunk,
        dirty: &DirtyFilesView<'_>,
        output: &mut dyn OutputConsumer,
    ) -> BuildResult<ExitCode> {
        let mut copied = 0;
        for (root, file) in dirty.dirty_files() {
            ctx.check_canceled()?;
            let target = root.target.clone();
            let Some(destination) = Self::destination(ctx, &target, &root, &file) else {
                ctx.process_message(BuildMessage::Compiler {
                    kind: MessageKind::Warning,
                    builder: NAME.to_string(),
                    text: format!("target {target} has no output root, skipping"),
                    source: Some(file),
                });
                continue;
            };

            let result = destination
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| fs::copy(&file, &destination));
            if let Err(e) = result {
                ctx.process_message(
                    BuildMessage::error(NAME, format!("cannot copy to {}: {e}", destination.display()))
                        .with_source(&file),
                );
                continue;
            }

            debug!("Copied {} to {}", file.display(), destination.display());
            output.register_compiled_artifact(CompiledArtifact {
                target,
                output: destination,
                sources: vec![file],
            })?;
            copied += 1;
        }

        Ok(if copied == 0 { ExitCode::NothingDone } else { ExitCode::Ok })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_incremental::{
        BuildConfig, BuildMode, BuildTarget, BuilderRegistry, CollectingMessageHandler, CompileScope, ProjectBuilder,
        ProjectModel, SourceRoot,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    fn project_builder(dir: &Path, handler: Arc<CollectingMessageHandler>) -> ProjectBuilder {
        let model = ProjectModel::new(vec![
            BuildTarget::new("res", TargetKind::Artifact)
                .with_root(SourceRoot::new(dir.join("res")))
                .with_output(dir.join("out/res")),
            BuildTarget::new("bare", TargetKind::Production).with_root(SourceRoot::new(dir.join("bare"))),
        ]);
        ProjectBuilder::from_model(
            BuildConfig::with_data_dir(dir.join(".kessel")),
            model,
            BuilderRegistry::new().with(Arc::new(CopyBuilder)),
            handler,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_copies_nested_files_and_removes_deleted_ones() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("res/img")).unwrap();
        fs::write(dir.path().join("res/img/logo.svg"), "<svg/>").unwrap();
        fs::write(dir.path().join("res/app.properties"), "a=1").unwrap();
        let handler = Arc::new(CollectingMessageHandler::new());
        let builder = project_builder(dir.path(), handler.clone());

        assert!(builder.build(CompileScope::all(), BuildMode::Make).await.is_ok());
        assert_eq!(fs::read_to_string(dir.path().join("out/res/img/logo.svg")).unwrap(), "<svg/>");
        assert!(dir.path().join("out/res/app.properties").exists());

        fs::remove_file(dir.path().join("res/img/logo.svg")).unwrap();
        assert!(builder.build(CompileScope::all(), BuildMode::Make).await.is_ok());
        assert!(!dir.path().join("out/res/img/logo.svg").exists());
        assert!(dir.path().join("out/res/app.properties").exists());
    }

    #[tokio::test]
    async fn test_target_without_output_root_is_skipped_with_warning() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("bare")).unwrap();
        fs::write(dir.path().join("bare/readme.txt"), "hi").unwrap();
        let handler = Arc::new(CollectingMessageHandler::new());
        let builder = project_builder(dir.path(), handler.clone());

        assert!(builder.build(CompileScope::all(), BuildMode::Make).await.is_ok());
        assert!(handler.messages().iter().any(|m| matches!(
            m,
            BuildMessage::Compiler { kind: MessageKind::Warning, .. }
        )));
    }
}
