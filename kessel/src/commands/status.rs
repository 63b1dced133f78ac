//! `kessel status`

use super::{ProjectArgs, scope_for};
use convenient_incremental::LoggingMessageHandler;
use std::sync::Arc;

pub fn run(project: &ProjectArgs, targets: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let builder = project.project_builder(None, Arc::new(LoggingMessageHandler))?;
    let status = builder.scan(scope_for(targets))?;

    let mut pending = 0;
    for (target, status) in &status {
        if status.is_up_to_date() {
            println!("{target}: up to date");
            continue;
        }
        pending += 1;
        println!(
            "{target}: {} dirty, {} deleted",
            status.dirty.len(),
            status.deleted.len()
        );
        for file in &status.dirty {
            println!("  M {}", file.display());
        }
        for file in &status.deleted {
            println!("  D {}", file.display());
        }
    }
    if let Some(millis) = status.values().filter_map(|s| s.last_rebuild_millis).max() {
        println!("Last full rebuild took {millis} ms");
    }
    println!("{pending} of {} targets need building", status.len());
    Ok(())
}
