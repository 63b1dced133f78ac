//! Cross-target change propagation
//!
//! Builders never touch another target's dirty state directly. Generated
//! and deleted files are published as [`FsEvent`]s onto an unbounded
//! channel, and the orchestrator drains the channel right after each
//! builder returns. Draining resolves every path against all source roots
//! and updates the dirty state of the targets owning them.

use crate::fs_state::{CompilationRound, FsState};
use crate::model::TargetId;
use crate::storage::TimestampStore;
use crate::target_index::BuildRootIndex;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::debug;

/// File system change caused by a build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    /// Outputs written by a builder on behalf of `source_target`
    FilesGenerated {
        source_target: TargetId,
        paths: Vec<PathBuf>,
    },
    /// Outputs removed from disk
    FilesDeleted { paths: Vec<PathBuf> },
}

/// Channel of pending [`FsEvent`]s.
#[derive(Debug)]
pub struct EventQueue {
    sender: UnboundedSender<FsEvent>,
    receiver: Mutex<UnboundedReceiver<FsEvent>>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn publish(&self, event: FsEvent) {
        // the receiver lives as long as the queue, so sending cannot fail
        let _ = self.sender.send(event);
    }

    /// Take every event published so far.
    pub fn drain(&self) -> Vec<FsEvent> {
        let mut receiver = self.receiver.lock();
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Applies [`FsEvent`]s to the dirty state.
pub struct ChangePropagator<'a> {
    roots: &'a BuildRootIndex,
    fs_state: &'a FsState,
    stamps: &'a TimestampStore,
}

impl<'a> ChangePropagator<'a> {
    pub fn new(roots: &'a BuildRootIndex, fs_state: &'a FsState, stamps: &'a TimestampStore) -> Self {
        Self {
            roots,
            fs_state,
            stamps,
        }
    }

    pub fn apply(&self, event: &FsEvent) {
        match event {
            FsEvent::FilesGenerated { source_target, paths } => {
                for path in paths {
                    for descriptor in self.roots.find_all_parent_descriptors(path) {
                        // the producing builder keeps its own target's state
                        if &descriptor.target == source_target {
                            continue;
                        }
                        if self
                            .fs_state
                            .mark_dirty(CompilationRound::Next, descriptor, path, Some(self.stamps))
                        {
                            debug!(
                                "{} generated {} in a root of {}",
                                source_target,
                                path.display(),
                                descriptor.target
                            );
                        }
                    }
                }
            }
            FsEvent::FilesDeleted { paths } => {
                for path in paths {
                    for descriptor in self.roots.find_all_parent_descriptors(path) {
                        self.fs_state.register_deleted(
                            &descriptor.target,
                            descriptor.scope,
                            path,
                            Some(self.stamps),
                        );
                    }
                }
            }
        }
    }
}
