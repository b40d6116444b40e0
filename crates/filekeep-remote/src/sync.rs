//! Pull-based synchronization of managed files from GitHub.
//!
//! Every replace is validate-backup-replace: the downloaded payload must decode
//! with the file's codec, the prior local content is backed up next, and a
//! failure at either step aborts before the working copy is touched. Downloads
//! are fully buffered before anything is written.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use filekeep_core::hash::content_hash;
use filekeep_core::{diff, CancelToken, FileError, FileEvent, RemoteFileConfig, Result, SharedSink};
use filekeep_local::{FileRegistry, ManagedFile};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::github::GitHubClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Checked too recently; nothing fetched.
    Skipped,
    /// Remote content matches the working copy.
    Unchanged,
    /// The working copy was replaced.
    Updated {
        backup: Option<PathBuf>,
        diff_entries: usize,
    },
}

/// Aggregate result of `sync_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub outcomes: Vec<(PathBuf, SyncOutcome)>,
    pub failed: Vec<(PathBuf, String)>,
}

impl SyncReport {
    pub fn updated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SyncOutcome::Updated { .. }))
            .count()
    }
}

pub struct RemoteSync {
    client: Arc<GitHubClient>,
    sink: SharedSink,
    last_checked: DashMap<PathBuf, Instant>,
}

impl std::fmt::Debug for RemoteSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSync")
            .field("client", &self.client)
            .field("tracked", &self.last_checked.len())
            .finish_non_exhaustive()
    }
}

fn remote_of(file: &dyn ManagedFile) -> Result<&RemoteFileConfig> {
    file.remote_config().ok_or_else(|| {
        FileError::NotFound(format!("No remote configured for {}", file.path().display()))
    })
}

impl RemoteSync {
    pub fn new(client: Arc<GitHubClient>, sink: SharedSink) -> Self {
        Self {
            client,
            sink,
            last_checked: DashMap::new(),
        }
    }

    /// False if `file` has no remote or was checked within its metadata cache
    /// window.
    pub fn should_check(&self, file: &dyn ManagedFile) -> bool {
        let Some(config) = file.remote_config() else {
            return false;
        };
        match self.last_checked.get(file.path()) {
            Some(at) => at.elapsed() >= config.metadata_cache_duration,
            None => true,
        }
    }

    fn mark_checked(&self, path: &Path) {
        self.last_checked.insert(path.to_path_buf(), Instant::now());
    }

    /// Forget cached check times so the next `sync` fetches.
    pub fn invalidate(&self, path: &Path) {
        self.last_checked.remove(path);
    }

    /// Fetch and replace the working copy unconditionally. Returns the backup
    /// of the prior content, if there was any.
    #[instrument(skip(self, file, cancel), level = "debug", fields(path = %file.path().display()))]
    pub async fn download(&self, file: &dyn ManagedFile, cancel: &CancelToken) -> Result<Option<PathBuf>> {
        let config = remote_of(file)?;
        let remote = self.client.fetch(config, cancel).await?;
        self.mark_checked(file.path());

        let local = read_local(file, cancel).await?;
        let (backup, _) = self.replace(file, local.as_deref(), &remote, cancel).await?;
        Ok(backup)
    }

    /// Fetch, compare by content hash, and replace the working copy only if it
    /// differs.
    #[instrument(skip(self, file, cancel), level = "debug", fields(path = %file.path().display()))]
    pub async fn sync(&self, file: &dyn ManagedFile, cancel: &CancelToken) -> Result<SyncOutcome> {
        let config = remote_of(file)?;
        if !self.should_check(file) {
            debug!("Remote check for {} is cached", file.path().display());
            return Ok(SyncOutcome::Skipped);
        }

        let remote = self.client.fetch(config, cancel).await?;
        self.mark_checked(file.path());

        let local = read_local(file, cancel).await?;
        if local
            .as_deref()
            .is_some_and(|l| content_hash(l) == content_hash(&remote))
        {
            debug!("{} matches {}", file.path().display(), config.display_address());
            self.sink.emit(FileEvent::RemoteChecked {
                path: file.path().to_path_buf(),
                changed: false,
            });
            return Ok(SyncOutcome::Unchanged);
        }

        self.sink.emit(FileEvent::RemoteChecked {
            path: file.path().to_path_buf(),
            changed: true,
        });
        let (backup, diff_entries) = self.replace(file, local.as_deref(), &remote, cancel).await?;
        Ok(SyncOutcome::Updated {
            backup,
            diff_entries,
        })
    }

    /// Sync every remote-enabled file in `registry`. Failures are collected,
    /// never short-circuit the batch.
    pub async fn sync_all(&self, registry: &FileRegistry, cancel: &CancelToken) -> SyncReport {
        let files = registry.remote_enabled();
        let results = join_all(files.iter().map(|file| async move {
            (file.path().to_path_buf(), self.sync(file.as_ref(), cancel).await)
        }))
        .await;

        let mut report = SyncReport::default();
        for (path, result) in results {
            match result {
                Ok(outcome) => report.outcomes.push((path, outcome)),
                Err(e) => {
                    warn!("Remote sync of {} failed: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        report
    }

    async fn replace(
        &self,
        file: &dyn ManagedFile,
        local: Option<&[u8]>,
        remote: &[u8],
        cancel: &CancelToken,
    ) -> Result<(Option<PathBuf>, usize)> {
        let path = file.path();

        // A payload the codec rejects must never reach the working copy.
        if let Err(e) = file.validate(remote) {
            warn!("Rejected remote content for {}: {}", path.display(), e);
            return Err(e);
        }

        let diff_entries = match local {
            Some(local) if file.is_structured() => {
                let report = diff(
                    &String::from_utf8_lossy(local),
                    &String::from_utf8_lossy(remote),
                );
                let summary = report.summary();
                debug!(
                    "Remote changes for {}: {} added, {} removed, {} modified",
                    path.display(),
                    summary.added,
                    summary.removed,
                    summary.modified
                );
                report.len()
            }
            _ => 0,
        };

        let backup = if local.is_some() {
            match file.backups().create_backup(path, cancel).await {
                Ok(backup) => Some(backup),
                Err(e) => {
                    self.sink.emit(FileEvent::BackupFailed {
                        source: path.to_path_buf(),
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        } else {
            None
        };

        file.store().write_atomic(path, remote, cancel).await?;
        file.reload(cancel).await?;

        info!(
            "Updated {} from remote ({} bytes, {} diff entries)",
            path.display(),
            remote.len(),
            diff_entries
        );
        self.sink.emit(FileEvent::RemoteUpdated {
            path: path.to_path_buf(),
            backup: backup.clone(),
            diff_entries,
        });
        Ok((backup, diff_entries))
    }
}

async fn read_local(file: &dyn ManagedFile, cancel: &CancelToken) -> Result<Option<Vec<u8>>> {
    match file.store().load_bytes(file.path(), cancel).await {
        Ok(data) => Ok(Some(data)),
        Err(FileError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
