//! Shared fixtures: a temp project tree and a scriptable translator

#![allow(dead_code)]

use convenient_incremental::{
    BuildConfig, BuildMode, BuildOutcome, BuildResult, BuildTarget, Builder, BuilderCategory, BuilderRegistry,
    CollectingMessageHandler, CompileContext, CompileScope, DirtyFilesView, ExitCode, OutputConsumer,
    ProjectBuilder, ProjectModel, SourceRoot, TargetChunk, TargetId, TargetKind,
};
use filetime::{FileTime, set_file_mtime};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tempfile::TempDir;

/// Source files get mtimes in the past so the commit never mistakes them
/// for files modified during compilation.
const BASE_MTIME: i64 = 1_600_000_000;

pub struct Project {
    dir: TempDir,
    clock: AtomicI64,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            clock: AtomicI64::new(BASE_MTIME),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write `rel` with a fresh mtime that is still in the past.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        let seconds = self.clock.fetch_add(10, Ordering::SeqCst);
        set_file_mtime(&path, FileTime::from_unix_time(seconds, 0)).unwrap();
        path
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.path(rel)).unwrap();
    }

    pub fn config(&self) -> BuildConfig {
        BuildConfig {
            data_dir: self.path("data"),
            max_parallelism: 2,
            rebuild_on_corruption: true,
            test_mode: true,
        }
    }

    /// Production module `<id>` with sources in `<id>/src` and output in `out/<id>`.
    pub fn module(&self, id: &str) -> BuildTarget {
        BuildTarget::new(id, TargetKind::Production)
            .with_root(SourceRoot::new(self.path(&format!("{id}/src"))))
            .with_output(self.path(&format!("out/{id}")))
    }

    pub fn builder(
        &self,
        targets: Vec<BuildTarget>,
        builders: &[Arc<ScriptedBuilder>],
    ) -> (ProjectBuilder, Arc<CollectingMessageHandler>) {
        let mut registry = BuilderRegistry::new();
        for builder in builders {
            registry.register(builder.clone());
        }
        let handler = Arc::new(CollectingMessageHandler::new());
        let project = ProjectBuilder::from_model(self.config(), ProjectModel::new(targets), registry, handler.clone())
            .unwrap();
        (project, handler)
    }
}

pub async fn make(builder: &ProjectBuilder) -> BuildOutcome {
    builder.build(CompileScope::all(), BuildMode::Make).await
}

pub type FileHook = Box<dyn Fn(&CompileContext, &Path) + Send + Sync>;

/// Translator that copies every dirty file to `<output>/<name>.out`.
///
/// Exit codes are taken from a script; once it runs out the builder
/// answers `Ok` or `NothingDone`.
pub struct ScriptedBuilder {
    name: &'static str,
    category: BuilderCategory,
    codes: Mutex<VecDeque<ExitCode>>,
    hook: Mutex<Option<FileHook>>,
    invocations: Mutex<Vec<Vec<PathBuf>>>,
    removed: Mutex<Vec<PathBuf>>,
    differentiate: Mutex<Vec<bool>>,
}

impl ScriptedBuilder {
    pub fn new(name: &'static str, category: BuilderCategory) -> Self {
        Self {
            name,
            category,
            codes: Mutex::new(VecDeque::new()),
            hook: Mutex::new(None),
            invocations: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            differentiate: Mutex::new(Vec::new()),
        }
    }

    pub fn translator() -> Arc<Self> {
        Arc::new(Self::new("copy", BuilderCategory::Translator))
    }

    pub fn with_codes(self, codes: impl IntoIterator<Item = ExitCode>) -> Arc<Self> {
        self.codes.lock().extend(codes);
        Arc::new(self)
    }

    /// Run `hook` for every file this builder compiles.
    pub fn set_hook(&self, hook: FileHook) {
        *self.hook.lock() = Some(hook);
    }

    pub fn clear_hook(&self) {
        *self.hook.lock() = None;
    }

    pub fn invocations(&self) -> Vec<Vec<PathBuf>> {
        self.invocations.lock().clone()
    }

    /// Files compiled since the last call, in order.
    pub fn take_compiled(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.invocations.lock()).into_iter().flatten().collect()
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.removed.lock().clone()
    }

    pub fn differentiate(&self) -> Vec<bool> {
        self.differentiate.lock().clone()
    }
}

impl Builder for ScriptedBuilder {
    fn name(&self) -> &str {
        self.name
    }

    fn category(&self) -> BuilderCategory {
        self.category
    }

    fn build(
        &self,
        ctx: &CompileContext,
        chunk: &TargetChunk,
        dirty: &DirtyFilesView<'_>,
        output: &mut dyn OutputConsumer,
    ) -> BuildResult<ExitCode> {
        let mut pending: Vec<(TargetId, PathBuf)> = Vec::new();
        let _ = dirty.process_dirty_files(|target, _, file| {
            pending.push((target.clone(), file.to_path_buf()));
            true
        });

        let mut compiled = Vec::new();
        for (target, file) in pending {
            if let Some(hook) = self.hook.lock().as_ref() {
                hook(ctx, &file);
            }
            let out_dir = ctx.index().target(&target).unwrap().outputs[0].clone();
            let out = out_dir.join(format!("{}.out", file.file_name().unwrap().to_string_lossy()));
            fs::create_dir_all(&out_dir).unwrap();
            let _ = fs::copy(&file, &out).unwrap();
            output.register_output(&target, &out, std::slice::from_ref(&file))?;
            compiled.push(file);
        }

        for target in chunk.targets() {
            self.removed.lock().extend(dirty.removed_files(target));
            self.differentiate.lock().push(ctx.should_differentiate(target));
        }
        let code = self.codes.lock().pop_front().unwrap_or(if compiled.is_empty() {
            ExitCode::NothingDone
        } else {
            ExitCode::Ok
        });
        self.invocations.lock().push(compiled);
        Ok(code)
    }
}
