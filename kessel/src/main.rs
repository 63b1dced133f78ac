//! Kessel - incremental build driver
//!
//! Loads a JSON project model, builds it with the built-in copy builder and
//! keeps the build data needed to stay incremental between runs.

mod commands;
mod copy_builder;

use clap::Parser;
use commands::{Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kessel=info,convenient_incremental=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            project,
            rebuild,
            jobs,
            target,
            force,
        } => commands::build::run(&project, rebuild, jobs, target, force).await,
        Commands::Status { project, target } => commands::status::run(&project, target),
        Commands::Clean { project } => commands::clean::run(&project),
    }
}
