//! Atomic, durable load/save of one logical file.
//!
//! Saves go to `<path>.tmp`, are flushed to disk, then renamed onto `<path>`.
//! A crash between the two steps leaves the destination fully old; the stale
//! temp file is discarded by the next load.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filekeep_core::{CancelToken, Codec, FileError, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::lock::PathLocks;

/// Suffix of the temporary file written before the rename.
pub const TEMP_SUFFIX: &str = ".tmp";

/// File I/O engine. Clones share one lock table.
#[derive(Debug, Clone, Default)]
pub struct FileStore {
    locks: Arc<PathLocks>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<path>.tmp`.
    pub fn temp_path(path: &Path) -> PathBuf {
        let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
        name.push(TEMP_SUFFIX);
        path.with_file_name(name)
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Read raw bytes under a shared lock.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn load_bytes(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<u8>> {
        cancel.check()?;
        let _guard = self.locks.read(path).await;
        remove_stale_temp(path).await;
        cancel.run(read_bytes(path)).await
    }

    /// Read UTF-8 text under a shared lock.
    pub async fn load_text(&self, path: &Path, cancel: &CancelToken) -> Result<String> {
        let bytes = self.load_bytes(path, cancel).await?;
        String::from_utf8(bytes)
            .map_err(|e| FileError::format(format!("{} is not valid UTF-8", path.display()), e))
    }

    /// Load and decode a typed value.
    pub async fn load<T>(
        &self,
        path: &Path,
        codec: &dyn Codec<T>,
        cancel: &CancelToken,
    ) -> Result<T> {
        let text = self.load_text(path, cancel).await?;
        codec.decode(&text)
    }

    /// Encode and atomically save a typed value.
    pub async fn save<T>(
        &self,
        path: &Path,
        codec: &dyn Codec<T>,
        value: &T,
        cancel: &CancelToken,
    ) -> Result<()> {
        let text = codec.encode(value)?;
        self.save_text(path, &text, cancel).await
    }

    pub async fn save_text(&self, path: &Path, text: &str, cancel: &CancelToken) -> Result<()> {
        self.write_atomic(path, text.as_bytes(), cancel).await
    }

    /// Temp-write then rename, under an exclusive lock.
    #[instrument(skip(self, data, cancel), level = "debug", fields(data_len = data.len()))]
    pub async fn write_atomic(&self, path: &Path, data: &[u8], cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let _guard = self.locks.write(path).await;
        let tmp = Self::temp_path(path);

        let result = async {
            write_temp(path, &tmp, data, cancel).await?;
            // Last point where cancellation is honoured; the rename is atomic.
            cancel.check()?;
            fs::rename(&tmp, path).await.map_err(|e| {
                FileError::io(format!("Failed to rename temp file to {}", path.display()), e)
            })?;
            sync_parent(path).await;
            Ok::<(), FileError>(())
        }
        .await;

        if result.is_err() {
            discard_temp(&tmp).await;
        } else {
            debug!("Saved {} bytes to {}", data.len(), path.display());
        }
        result
    }

    /// Publish `data` at `path` only if nothing exists there yet.
    ///
    /// The content is written to a temp file and hard-linked into place, so the
    /// final name either does not exist or holds the complete content. An
    /// existing file at `path` is an `Io` failure.
    #[instrument(skip(self, data, cancel), level = "debug", fields(data_len = data.len()))]
    pub async fn write_new(&self, path: &Path, data: &[u8], cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let _guard = self.locks.write(path).await;
        let tmp = Self::temp_path(path);

        let result = async {
            write_temp(path, &tmp, data, cancel).await?;
            cancel.check()?;
            fs::hard_link(&tmp, path).await.map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    FileError::io(format!("{} already exists", path.display()), e)
                } else {
                    FileError::io(format!("Failed to publish {}", path.display()), e)
                }
            })?;
            sync_parent(path).await;
            Ok::<(), FileError>(())
        }
        .await;

        discard_temp(&tmp).await;
        result
    }

    /// Drop a `<path>.tmp` left behind by an interrupted write. Waits for any
    /// writer of `path` first, so an in-flight temp file is never touched.
    pub async fn discard_stale_temp(&self, path: &Path) {
        let _guard = self.locks.write(path).await;
        remove_stale_temp(path).await;
    }

    /// Delete a file under an exclusive lock.
    pub async fn remove(&self, path: &Path) -> Result<()> {
        let _guard = self.locks.write(path).await;
        fs::remove_file(path)
            .await
            .map_err(|e| map_not_found(e, path, format!("Failed to delete {}", path.display())))
    }
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .await
        .map_err(|e| map_not_found(e, path, format!("Failed to read {}", path.display())))
}

fn map_not_found(e: std::io::Error, path: &Path, message: String) -> FileError {
    if e.kind() == ErrorKind::NotFound {
        FileError::NotFound(path.display().to_string())
    } else {
        FileError::io(message, e)
    }
}

async fn write_temp(path: &Path, tmp: &Path, data: &[u8], cancel: &CancelToken) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|e| {
            FileError::io(
                format!("Failed to create parent directory for {}", path.display()),
                e,
            )
        })?;
    }

    cancel
        .run(async {
            let mut file = fs::File::create(tmp).await.map_err(|e| {
                FileError::io(format!("Failed to create temp file {}", tmp.display()), e)
            })?;
            file.write_all(data).await.map_err(|e| {
                FileError::io(format!("Failed to write temp file {}", tmp.display()), e)
            })?;
            file.sync_all().await.map_err(|e| {
                FileError::io(format!("Failed to flush temp file {}", tmp.display()), e)
            })?;
            Ok::<(), FileError>(())
        })
        .await
}

async fn discard_temp(tmp: &Path) {
    if let Err(e) = fs::remove_file(tmp).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove temp file {}: {}", tmp.display(), e);
        }
    }
}

/// A temp file seen while no writer holds the lock was left by a crash.
async fn remove_stale_temp(path: &Path) {
    let tmp = FileStore::temp_path(path);
    if fs::try_exists(&tmp).await.unwrap_or(false) {
        debug!("Discarding stale temp file {}", tmp.display());
        discard_temp(&tmp).await;
    }
}

#[cfg(unix)]
async fn sync_parent(path: &Path) {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    match fs::File::open(parent).await {
        Ok(dir) => {
            if let Err(e) = dir.sync_all().await {
                debug!("Failed to sync directory {}: {}", parent.display(), e);
            }
        }
        Err(e) => debug!("Failed to open directory {}: {}", parent.display(), e),
    }
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) {}
