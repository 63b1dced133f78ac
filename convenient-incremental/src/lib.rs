//! Incremental build orchestration.
//!
//! Given a graph of build targets, this crate works out which source files
//! must be recompiled, runs an ordered pipeline of pluggable builders over
//! them and durably records file stamps, configuration fingerprints and
//! source-to-output mappings so the next build can be incremental again.
//!
//! # Features
//!
//! - Chunking of cyclic target dependencies into strongly connected components
//! - Per-target dirty state with round overlays for multi-pass chunk builds
//! - Fixed-point builder passes (`AdditionalPassRequired`, `ChunkRebuildRequired`)
//! - Cross-target propagation of generated and deleted files
//! - Commit guarded against files modified during compilation
//! - Automatic full rebuild when build data is corrupted
//!
//! # Example
//!
//! ```no_run
//! use convenient_incremental::{
//!     BuildConfig, BuildMode, BuilderRegistry, CompileScope, LoggingMessageHandler, ProjectBuilder,
//!     ProjectModel,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = ProjectModel::from_file(Path::new("project.json"))?;
//!     let builder = ProjectBuilder::from_model(
//!         BuildConfig::default(),
//!         model,
//!         BuilderRegistry::new(),
//!         Arc::new(LoggingMessageHandler),
//!     )?;
//!
//!     let outcome = builder.build(CompileScope::all(), BuildMode::Make).await;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fs_state;
pub mod message;
pub mod model;
pub mod operations;
mod output;
mod pipeline;
pub mod runner;
pub mod scope;
pub mod storage;
pub mod target_index;

pub use builder::{
    Builder, BuilderCategory, BuilderRegistry, BuilderStatistics, CompiledArtifact, DirtyFilesView, ExitCode,
    OutputConsumer,
};
pub use config::BuildConfig;
pub use context::{CancelStatus, CompileContext, SessionState};
pub use error::{BuildError, BuildOutcome, BuildResult};
pub use events::FsEvent;
pub use fs_state::CompilationRound;
pub use message::{
    BuildMessage, CollectingMessageHandler, LoggingMessageHandler, MessageHandler, MessageKind, TargetEvent,
};
pub use model::{BuildTarget, ProjectModel, SourceRoot, SourceScope, TargetId, TargetKind};
pub use runner::{ProjectBuilder, TargetStatus};
pub use scope::{BuildMode, CompileScope};
pub use storage::{BuildDataManager, StorageError};
pub use target_index::{BuildTargetIndex, RootDescriptor, TargetChunk};
