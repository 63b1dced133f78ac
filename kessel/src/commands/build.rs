//! `kessel build`

use super::{ProjectArgs, scope_for};
use convenient_incremental::{
    BuildMessage, BuildMode, BuildOutcome, LoggingMessageHandler, MessageHandler, MessageKind, TargetEvent,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Logs every message and counts what the summary needs.
#[derive(Default)]
struct SummaryHandler {
    log: LoggingMessageHandler,
    errors: AtomicUsize,
    warnings: AtomicUsize,
    chunks: AtomicUsize,
    generated: AtomicUsize,
    deleted: AtomicUsize,
}

impl MessageHandler for SummaryHandler {
    fn process_message(&self, message: &BuildMessage) {
        self.log.process_message(message);
        let counter = match message {
            BuildMessage::Compiler {
                kind: MessageKind::Error,
                ..
            } => &self.errors,
            BuildMessage::Compiler {
                kind: MessageKind::Warning,
                ..
            } => &self.warnings,
            BuildMessage::BuildingTarget {
                event: TargetEvent::Finished,
                ..
            } => &self.chunks,
            BuildMessage::FilesGenerated { paths, .. } => {
                let _ = self.generated.fetch_add(paths.len(), Ordering::Relaxed);
                return;
            }
            BuildMessage::FilesDeleted { paths } => {
                let _ = self.deleted.fetch_add(paths.len(), Ordering::Relaxed);
                return;
            }
            _ => return,
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub async fn run(
    project: &ProjectArgs,
    rebuild: bool,
    jobs: Option<usize>,
    targets: Vec<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = Arc::new(SummaryHandler::default());
    let builder = project.project_builder(jobs, summary.clone())?;

    let mode = if rebuild {
        BuildMode::Rebuild
    } else if force {
        BuildMode::Chunk
    } else {
        BuildMode::Make
    };

    let start = Instant::now();
    let outcome = builder.build(scope_for(targets), mode).await;

    println!();
    println!("Build summary ({:.2}s)", start.elapsed().as_secs_f64());
    println!("  Chunks built:    {}", summary.chunks.load(Ordering::Relaxed));
    println!("  Files generated: {}", summary.generated.load(Ordering::Relaxed));
    println!("  Files deleted:   {}", summary.deleted.load(Ordering::Relaxed));
    println!("  Warnings:        {}", summary.warnings.load(Ordering::Relaxed));
    println!("  Errors:          {}", summary.errors.load(Ordering::Relaxed));

    match outcome {
        BuildOutcome::Ok => {
            println!("  Result:          success");
            Ok(())
        }
        BuildOutcome::Stopped(message) => Err(format!(
            "build stopped{}",
            message.map(|m| format!(": {m}")).unwrap_or_default()
        )
        .into()),
        BuildOutcome::Failed(e) => Err(e.into()),
        BuildOutcome::Cancelled => Err("build cancelled".into()),
        BuildOutcome::RebuildRequested(reason) => {
            Err(format!("build data is unusable, run with --rebuild: {reason}").into())
        }
    }
}
