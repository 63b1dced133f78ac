//! Build messages: the user-visible output of a session

use crate::model::TargetId;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEvent {
    Started,
    Finished,
}

/// Event sent to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildMessage {
    /// Diagnostic from a builder or from the orchestrator itself.
    Compiler {
        kind: MessageKind,
        builder: String,
        text: String,
        source: Option<PathBuf>,
    },
    Progress {
        text: String,
    },
    BuildingTarget {
        targets: Vec<TargetId>,
        event: TargetEvent,
    },
    FilesGenerated {
        target: TargetId,
        paths: Vec<PathBuf>,
    },
    FilesDeleted {
        paths: Vec<PathBuf>,
    },
    BuilderStatistics {
        builder: String,
        elapsed: Duration,
        processed_sources: usize,
    },
    /// A chunk committed stamps.
    DoneSomething,
    /// Some targets still have dirty or deleted files after the session.
    UnprocessedChanges {
        targets: Vec<TargetId>,
    },
}

impl BuildMessage {
    pub fn error(builder: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Compiler {
            kind: MessageKind::Error,
            builder: builder.into(),
            text: text.into(),
            source: None,
        }
    }

    pub fn info(builder: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Compiler {
            kind: MessageKind::Info,
            builder: builder.into(),
            text: text.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        if let Self::Compiler { source, .. } = &mut self {
            *source = Some(path.into());
        }
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::Compiler {
                kind: MessageKind::Error,
                ..
            }
        )
    }
}

/// Receiver of build messages.
pub trait MessageHandler: Send + Sync {
    fn process_message(&self, message: &BuildMessage);
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct CollectingMessageHandler {
    messages: Mutex<Vec<BuildMessage>>,
}

impl CollectingMessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<BuildMessage> {
        self.messages.lock().clone()
    }

    pub fn errors(&self) -> Vec<BuildMessage> {
        self.messages.lock().iter().filter(|m| m.is_error()).cloned().collect()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl MessageHandler for CollectingMessageHandler {
    fn process_message(&self, message: &BuildMessage) {
        self.messages.lock().push(message.clone());
    }
}

/// Forwards messages to `tracing`.
#[derive(Debug, Default)]
pub struct LoggingMessageHandler;

impl MessageHandler for LoggingMessageHandler {
    fn process_message(&self, message: &BuildMessage) {
        match message {
            BuildMessage::Compiler {
                kind,
                builder,
                text,
                source,
            } => {
                let location = source
                    .as_ref()
                    .map(|p| format!(" ({})", p.display()))
                    .unwrap_or_default();
                match kind {
                    MessageKind::Error => error!("[{builder}] {text}{location}"),
                    MessageKind::Warning => warn!("[{builder}] {text}{location}"),
                    MessageKind::Info => info!("[{builder}] {text}{location}"),
                }
            }
            BuildMessage::Progress { text } => info!("{text}"),
            BuildMessage::BuildingTarget { targets, event } => {
                debug!("{event:?} building {}", join(targets));
            }
            BuildMessage::FilesGenerated { target, paths } => {
                debug!("{target} generated {} files", paths.len());
            }
            BuildMessage::FilesDeleted { paths } => debug!("Deleted {} files", paths.len()),
            BuildMessage::BuilderStatistics {
                builder,
                elapsed,
                processed_sources,
            } => info!("Builder {builder}: {processed_sources} sources in {elapsed:?}"),
            BuildMessage::DoneSomething => {}
            BuildMessage::UnprocessedChanges { targets } => {
                info!("Unprocessed changes left in {}", join(targets));
            }
        }
    }
}

fn join(targets: &[TargetId]) -> String {
    targets.iter().map(TargetId::as_str).collect::<Vec<_>>().join(", ")
}
