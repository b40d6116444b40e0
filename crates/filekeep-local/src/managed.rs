use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use filekeep_core::{CancelToken, RemoteFileConfig, Result};

use crate::backup::BackupManager;
use crate::store::FileStore;

/// A persisted resource tracked by one manager.
///
/// This is the view the auto-save scheduler, crash recovery and remote sync
/// have of a managed file; it hides the cached value's type.
#[async_trait]
pub trait ManagedFile: Send + Sync {
    /// Path of the working copy; also the registry key.
    fn path(&self) -> &Path;

    /// Cached data differs from the last durable save.
    fn has_pending_auto_save(&self) -> bool;

    /// The file on disk holds content not captured by any backup.
    fn has_changes_since_backup(&self) -> bool;

    fn is_auto_save_enabled(&self) -> bool;

    /// Whether crash recovery may restore this file from its latest backup.
    fn is_recoverable(&self) -> bool {
        true
    }

    /// Whether the persisted form is a JSON document.
    fn is_structured(&self) -> bool;

    fn remote_config(&self) -> Option<&RemoteFileConfig>;

    fn backups(&self) -> &BackupManager;

    fn store(&self) -> &FileStore;

    /// Fail with `Format` unless `bytes` decode as this file's content.
    fn validate(&self, bytes: &[u8]) -> Result<()>;

    /// Persist the cached data.
    async fn save(&self, cancel: &CancelToken) -> Result<()>;

    /// Replace the cached data with what is on disk.
    async fn reload(&self, cancel: &CancelToken) -> Result<()>;

    /// Back up the working copy if it changed since the last backup.
    async fn backup_now(&self, cancel: &CancelToken) -> Result<Option<PathBuf>>;
}

pub type SharedFile = Arc<dyn ManagedFile>;
