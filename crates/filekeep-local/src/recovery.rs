//! Crash detection and restore-from-backup on startup.
//!
//! A flag file is written on startup and removed on clean shutdown. Finding
//! it at the next startup means the previous run did not exit cleanly; every
//! recoverable managed file is then restored from its latest backup, with the
//! working copy kept aside as `<name>.corrupted_<timestamp>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use filekeep_core::{CancelToken, FileError, FileEvent, NullSink, Result, SharedSink};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::registry::FileRegistry;

pub const CRASH_FLAG_NAME: &str = "filekeep.running";
pub const APP_DIR_NAME: &str = "filekeep";

/// One file restored during recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredFile {
    pub path: PathBuf,
    pub backup: PathBuf,
    pub preserved: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub crash_detected: bool,
    pub restored: Vec<RestoredFile>,
    /// Files with no backup to restore from.
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct CrashRecovery {
    flag_path: PathBuf,
    sink: SharedSink,
}

impl std::fmt::Debug for CrashRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashRecovery")
            .field("flag_path", &self.flag_path)
            .finish_non_exhaustive()
    }
}

impl CrashRecovery {
    /// Keep the crash flag in `app_data_dir`.
    pub fn new(app_data_dir: impl AsRef<Path>) -> Self {
        Self {
            flag_path: app_data_dir.as_ref().join(CRASH_FLAG_NAME),
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Platform application-data directory for filekeep.
    pub fn default_data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME))
    }

    pub fn flag_path(&self) -> &Path {
        &self.flag_path
    }

    pub async fn crash_detected(&self) -> bool {
        fs::try_exists(&self.flag_path).await.unwrap_or(false)
    }

    /// Restore every recoverable file if the previous run crashed, then write
    /// the crash flag. Per-file failures are reported, not returned; only a
    /// failure to write the flag is an error.
    #[instrument(skip(self, registry, cancel), level = "debug")]
    pub async fn start(&self, registry: &FileRegistry, cancel: &CancelToken) -> Result<RecoveryReport> {
        let mut report = RecoveryReport {
            crash_detected: self.crash_detected().await,
            ..Default::default()
        };

        if report.crash_detected {
            warn!(
                "Crash flag found at {}, restoring managed files from backup",
                self.flag_path.display()
            );
            self.recover_all(registry, cancel, &mut report).await;
            info!(
                "Recovery finished: {} restored, {} skipped, {} failed",
                report.restored.len(),
                report.skipped.len(),
                report.failed.len()
            );
        } else {
            debug!("No crash flag at {}", self.flag_path.display());
        }

        self.write_flag().await?;
        Ok(report)
    }

    async fn recover_all(
        &self,
        registry: &FileRegistry,
        cancel: &CancelToken,
        report: &mut RecoveryReport,
    ) {
        for file in registry.files() {
            if !file.is_recoverable() {
                continue;
            }
            let path = file.path().to_path_buf();

            let latest = match file.backups().latest_backup(&path).await {
                Ok(latest) => latest,
                Err(FileError::NotFound(_)) => {
                    debug!("No backup to recover {} from", path.display());
                    report.skipped.push(path);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to list backups of {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                    continue;
                }
            };

            let preserved = match file
                .backups()
                .restore_preserving(&latest.path, &path, cancel)
                .await
            {
                Ok(preserved) => preserved,
                Err(e) => {
                    warn!("Failed to recover {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                    continue;
                }
            };

            if let Err(e) = file.reload(cancel).await {
                warn!("Recovered {} but reload failed: {}", path.display(), e);
                report.failed.push((path, e.to_string()));
                continue;
            }

            info!("Recovered {} from {}", path.display(), latest.path.display());
            self.sink.emit(FileEvent::Recovered {
                path: path.clone(),
                backup: latest.path.clone(),
                preserved: preserved.clone(),
            });
            report.restored.push(RestoredFile {
                path,
                backup: latest.path,
                preserved,
            });
        }
    }

    async fn write_flag(&self) -> Result<()> {
        if let Some(parent) = self.flag_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                FileError::io(format!("Failed to create {}", parent.display()), e)
            })?;
        }
        let contents = format!(
            "pid={}\nstarted={}\n",
            std::process::id(),
            Local::now().to_rfc3339()
        );
        fs::write(&self.flag_path, contents).await.map_err(|e| {
            FileError::io(
                format!("Failed to write crash flag {}", self.flag_path.display()),
                e,
            )
        })?;
        debug!("Wrote crash flag {}", self.flag_path.display());
        Ok(())
    }

    /// Remove the crash flag. A missing flag is not an error.
    pub async fn shutdown(&self) -> Result<()> {
        match fs::remove_file(&self.flag_path).await {
            Ok(()) => {
                debug!("Removed crash flag {}", self.flag_path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileError::io(
                format!("Failed to remove crash flag {}", self.flag_path.display()),
                e,
            )),
        }
    }
}
