//! Timestamped backup copies with count and age retention.
//!
//! Layout, with the default options:
//! ```text
//! settings.json
//! .backup/
//!   settings_20240301_101500.bak
//!   settings_20240301_103000.bak
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};
use filekeep_core::config::TIMESTAMP_FORMAT;
use filekeep_core::{BackupOptions, CancelToken, FileError, Result, SharedClock, SystemClock};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::store::{FileStore, TEMP_SUFFIX};

/// One backup file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
    /// Timestamp parsed from the file name.
    pub taken_at: NaiveDateTime,
}

/// Creates, lists, prunes and restores backups for managed files.
#[derive(Clone)]
pub struct BackupManager {
    options: BackupOptions,
    store: FileStore,
    clock: SharedClock,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl BackupManager {
    pub fn new(options: BackupOptions, store: FileStore) -> Self {
        Self {
            options,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn backup_dir(&self, source: &Path) -> PathBuf {
        self.options.directory_for(source)
    }

    /// Pattern with `{filename}` and `{extension}` substituted, split around
    /// `{timestamp}`.
    fn name_parts(&self, source: &Path) -> Result<(String, String)> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = source
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let pattern = self
            .options
            .name_pattern
            .replace("{filename}", &stem)
            .replace("{extension}", &extension);

        let (prefix, suffix) = pattern.split_once("{timestamp}").ok_or_else(|| {
            FileError::Format {
                message: format!(
                    "Backup name pattern '{}' has no {{timestamp}} placeholder",
                    self.options.name_pattern
                ),
                source: None,
            }
        })?;
        Ok((prefix.to_string(), suffix.to_string()))
    }

    /// File name of a backup of `source` taken at `at`.
    pub fn backup_name(&self, source: &Path, at: DateTime<Local>) -> Result<String> {
        let (prefix, suffix) = self.name_parts(source)?;
        Ok(format!("{}{}{}", prefix, at.format(TIMESTAMP_FORMAT), suffix))
    }

    /// Copy `source` to a new timestamped backup, then prune old backups.
    ///
    /// Fails with `NotFound` if the source is absent and with `Io` if a backup
    /// with the generated name already exists.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn create_backup(&self, source: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        if !self.store.exists(source).await {
            return Err(FileError::NotFound(source.display().to_string()));
        }

        let name = self.backup_name(source, self.clock.now())?;
        let target = self.backup_dir(source).join(name);
        let data = self.store.load_bytes(source, cancel).await?;

        // Collisions at one-second granularity surface as an `Io` failure.
        self.store.write_new(&target, &data, cancel).await?;

        info!(
            "Created backup {} ({} bytes) of {}",
            target.display(),
            data.len(),
            source.display()
        );

        self.cleanup(source).await;
        Ok(target)
    }

    /// Backups of `source`, newest first.
    pub async fn list_backups(&self, source: &Path) -> Result<Vec<BackupEntry>> {
        let dir = self.backup_dir(source);
        let (prefix, suffix) = self.name_parts(source)?;

        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(FileError::io(
                    format!("Failed to read backup directory {}", dir.display()),
                    e,
                ))
            }
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| {
            FileError::io(
                format!("Failed to read backup directory {}", dir.display()),
                e,
            )
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(taken_at) = parse_timestamp(&name, &prefix, &suffix) else {
                continue;
            };
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(e) => {
                    debug!("Skipping backup {}: {}", name, e);
                    continue;
                }
            };
            entries.push(BackupEntry {
                path: entry.path(),
                modified,
                taken_at,
            });
        }

        entries.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.taken_at.cmp(&a.taken_at))
        });
        Ok(entries)
    }

    /// Most recently modified backup of `source`.
    pub async fn latest_backup(&self, source: &Path) -> Result<BackupEntry> {
        self.list_backups(source)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FileError::NotFound(format!("No backup of {}", source.display())))
    }

    /// Apply count and age retention independently. Failures are logged and
    /// swallowed; returns the backups that were deleted.
    pub async fn cleanup(&self, source: &Path) -> Vec<PathBuf> {
        self.sweep_temps(source).await;

        let entries = match self.list_backups(source).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list backups of {}: {}", source.display(), e);
                return Vec::new();
            }
        };

        let now = SystemTime::from(self.clock.now());
        let max_count = self.options.max_count;
        let mut removed = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            let over_count = max_count > 0 && i >= max_count;
            let too_old = self.options.retention_period.is_some_and(|retention| {
                now.duration_since(entry.modified)
                    .map(|age| age > retention)
                    .unwrap_or(false)
            });
            if !over_count && !too_old {
                continue;
            }

            match self.store.remove(&entry.path).await {
                Ok(()) => {
                    debug!(
                        "Pruned backup {} (over_count={}, too_old={})",
                        entry.path.display(),
                        over_count,
                        too_old
                    );
                    removed.push(entry.path.clone());
                }
                Err(e) => warn!("Failed to prune backup {}: {}", entry.path.display(), e),
            }
        }

        removed
    }

    /// Discard `<backup>.tmp` files left by a backup write that never finished.
    async fn sweep_temps(&self, source: &Path) {
        let Ok((prefix, suffix)) = self.name_parts(source) else {
            return;
        };
        let dir = self.backup_dir(source);
        let Ok(mut read_dir) = fs::read_dir(&dir).await else {
            return;
        };

        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(backup_name) = name.strip_suffix(TEMP_SUFFIX) else {
                continue;
            };
            if parse_timestamp(backup_name, &prefix, &suffix).is_some() {
                self.store.discard_stale_temp(&dir.join(backup_name)).await;
            }
        }
    }

    /// Atomically replace `target` with the content of `backup`.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn restore(&self, backup: &Path, target: &Path, cancel: &CancelToken) -> Result<()> {
        let data = self.store.load_bytes(backup, cancel).await?;
        self.store.write_atomic(target, &data, cancel).await?;
        info!("Restored {} from {}", target.display(), backup.display());
        Ok(())
    }

    /// Copy the current `target` aside as `<name>.corrupted_<timestamp>`, then
    /// restore `backup` over it. Returns where the old copy went, if it existed.
    ///
    /// `target` stays in place until the atomic replace succeeds; on failure the
    /// aside copy is dropped again.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn restore_preserving(
        &self,
        backup: &Path,
        target: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<PathBuf>> {
        cancel.check()?;
        // Read first so a missing backup never touches the working copy.
        let data = self.store.load_bytes(backup, cancel).await?;

        let preserved = if self.store.exists(target).await {
            let current = self.store.load_bytes(target, cancel).await?;
            let aside = self.preserved_path(target).await;
            self.store.write_new(&aside, &current, cancel).await?;
            Some(aside)
        } else {
            None
        };

        if let Err(e) = self.store.write_atomic(target, &data, cancel).await {
            if let Some(aside) = &preserved {
                if let Err(cleanup) = self.store.remove(aside).await {
                    warn!("Failed to drop {}: {}", aside.display(), cleanup);
                }
            }
            return Err(e);
        }

        if let Some(aside) = &preserved {
            info!("Preserved {} as {}", target.display(), aside.display());
        }
        info!("Restored {} from {}", target.display(), backup.display());
        Ok(preserved)
    }

    async fn preserved_path(&self, target: &Path) -> PathBuf {
        let stamp = self.clock.now().format(TIMESTAMP_FORMAT).to_string();
        let base = target.file_name().map(OsString::from).unwrap_or_default();

        let mut attempt = 0u32;
        loop {
            let mut name = base.clone();
            name.push(format!(".corrupted_{}", stamp));
            if attempt > 0 {
                name.push(format!("_{}", attempt));
            }
            let candidate = target.with_file_name(name);
            if !self.store.exists(&candidate).await {
                return candidate;
            }
            attempt += 1;
        }
    }
}

fn parse_timestamp(name: &str, prefix: &str, suffix: &str) -> Option<NaiveDateTime> {
    let middle = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    NaiveDateTime::parse_from_str(middle, TIMESTAMP_FORMAT).ok()
}
