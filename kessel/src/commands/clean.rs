//! `kessel clean`

use super::ProjectArgs;
use convenient_incremental::LoggingMessageHandler;
use std::sync::Arc;
use tracing::info;

pub fn run(project: &ProjectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let builder = project.project_builder(None, Arc::new(LoggingMessageHandler))?;
    builder.clean()?;
    info!("Removed outputs and build data in {}", project.data_dir.display());
    Ok(())
}
