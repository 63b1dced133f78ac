//! Kessel command-line interface
//!
//! - `build`: incremental build, or a full rebuild with `--rebuild`
//! - `status`: what the next build would recompile
//! - `clean`: remove outputs and build data

use clap::{Args, Parser, Subcommand};
use convenient_incremental::{
    BuildConfig, BuilderRegistry, CompileScope, MessageHandler, ProjectBuilder, ProjectModel, TargetId,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub mod build;
pub mod clean;
pub mod status;

/// Kessel - incremental build driver
#[derive(Parser)]
#[command(name = "kessel")]
#[command(about = "Incremental build driver for JSON-described projects")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the project
    Build {
        #[command(flatten)]
        project: ProjectArgs,

        /// Discard all build data and rebuild everything
        #[arg(long)]
        rebuild: bool,

        /// Maximum number of chunks built in parallel
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Restrict the build to these targets
        #[arg(short, long)]
        target: Vec<String>,

        /// Recompile the selected targets from scratch
        #[arg(long)]
        force: bool,
    },

    /// Show files the next build would recompile
    Status {
        #[command(flatten)]
        project: ProjectArgs,

        /// Only report these targets
        #[arg(short, long)]
        target: Vec<String>,
    },

    /// Delete build outputs and build data
    Clean {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

#[derive(Args)]
pub struct ProjectArgs {
    /// Path to the project model
    #[arg(short, long, default_value = "kessel.json")]
    pub project: PathBuf,

    /// Directory holding the build data
    #[arg(short, long, default_value = ".kessel")]
    pub data_dir: PathBuf,
}

impl ProjectArgs {
    /// Load the model and set up a project builder with the built-in builders.
    pub fn project_builder(
        &self,
        jobs: Option<usize>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ProjectBuilder, Box<dyn std::error::Error>> {
        info!("Loading project model from {}", self.project.display());
        let model = ProjectModel::from_file(&self.project)?;

        let mut config = BuildConfig::with_data_dir(&self.data_dir);
        if let Some(jobs) = jobs {
            config.max_parallelism = jobs.max(1);
        }

        let registry = BuilderRegistry::new().with(Arc::new(crate::copy_builder::CopyBuilder));
        Ok(ProjectBuilder::from_model(config, model, registry, handler)?)
    }
}

/// Scope covering `targets`, or the whole project if none are given.
pub fn scope_for(targets: Vec<String>) -> CompileScope {
    if targets.is_empty() {
        CompileScope::all()
    } else {
        CompileScope::all().with_targets(targets.into_iter().map(TargetId::new))
    }
}
