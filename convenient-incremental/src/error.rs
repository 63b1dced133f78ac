//! Error types for the incremental build core

use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised while running a build session.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build was stopped on purpose; every diagnostic has already been reported.
    #[error("build stopped{}", stop_suffix(.message))]
    Stop { message: Option<String> },

    /// Unexpected failure while building a chunk.
    #[error("internal error while building {context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Incremental state can no longer be trusted; the whole project must be rebuilt.
    #[error("project rebuild requested: {reason}")]
    RebuildRequested { reason: String },

    /// The session was cancelled.
    #[error("build cancelled")]
    Cancelled,

    /// Durable build data is unreadable or could not be written.
    #[error("build data corrupted: {0}")]
    DataCorrupted(#[from] StorageError),

    /// Builders reported compilation errors.
    #[error("compilation finished with errors")]
    CompilationErrors,

    /// The project model is inconsistent.
    #[error("invalid project model: {0}")]
    InvalidModel(String),

    /// Dependency graph failure
    #[error("dependency graph error: {0}")]
    Graph(#[from] convenient_graph::GraphError),
}

impl BuildError {
    /// Shorthand for a reported stop with a message.
    pub fn stop(message: impl Into<String>) -> Self {
        Self::Stop {
            message: Some(message.into()),
        }
    }

    /// Wrap any error as an internal failure of `context`.
    pub fn internal(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Internal {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Whether a project rebuild could recover from this error.
    pub fn requests_rebuild(&self) -> bool {
        matches!(self, Self::RebuildRequested { .. } | Self::DataCorrupted(_))
    }
}

fn stop_suffix(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
}

/// Result type for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// Final status of a build session.
#[derive(Debug)]
pub enum BuildOutcome {
    /// Every affected chunk built and committed.
    Ok,
    /// A builder stopped the build.
    Stopped(Option<String>),
    /// The build failed.
    Failed(BuildError),
    /// The session was cancelled before finishing.
    Cancelled,
    /// Incremental state is broken and automatic recovery was not possible.
    RebuildRequested(String),
}

impl BuildOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub(crate) fn from_result(result: BuildResult<()>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(BuildError::Stop { message }) => Self::Stopped(message),
            Err(BuildError::Cancelled) => Self::Cancelled,
            Err(BuildError::RebuildRequested { reason }) => Self::RebuildRequested(reason),
            Err(err) => Self::Failed(err),
        }
    }
}
