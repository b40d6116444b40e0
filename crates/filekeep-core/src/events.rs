//! Lifecycle events and the narrow capability used to announce them.
//!
//! The core never depends on a concrete event bus: hosts hand in anything that
//! implements `EventSink`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something that happened to a managed file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FileEvent {
    Loaded {
        path: PathBuf,
    },
    Saved {
        path: PathBuf,
    },
    BackupCreated {
        source: PathBuf,
        backup: PathBuf,
    },
    BackupFailed {
        source: PathBuf,
        message: String,
    },
    AutoSaveStarted {
        count: usize,
    },
    AutoSaveCompleted {
        path: PathBuf,
    },
    AutoSaveFailed {
        path: PathBuf,
        message: String,
    },
    RemoteChecked {
        path: PathBuf,
        changed: bool,
    },
    RemoteUpdated {
        path: PathBuf,
        backup: Option<PathBuf>,
        diff_entries: usize,
    },
    Rollback {
        path: PathBuf,
        backup: PathBuf,
    },
    Recovered {
        path: PathBuf,
        backup: PathBuf,
        preserved: Option<PathBuf>,
    },
}

/// Event emission capability. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FileEvent);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: FileEvent) {}
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: FileEvent) {
        match &event {
            FileEvent::AutoSaveFailed { path, message } => {
                warn!("Auto-save failed for {}: {}", path.display(), message)
            }
            FileEvent::BackupFailed { source, message } => {
                warn!("Backup failed for {}: {}", source.display(), message)
            }
            FileEvent::RemoteUpdated { .. }
            | FileEvent::Rollback { .. }
            | FileEvent::Recovered { .. } => info!(?event, "file event"),
            _ => debug!(?event, "file event"),
        }
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<FileEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FileEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: FileEvent) {
        // A dropped receiver means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}
