//! Typed cache over one persisted file.
//!
//! `FileManager<T>` owns the in-memory value, tracks whether it differs from
//! the last durable save (pending auto-save), tracks whether the file on disk
//! differs from the last backup, and exposes itself to background subsystems
//! through `ManagedFile`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use filekeep_core::hash::content_hash;
use filekeep_core::{
    CancelToken, Codec, FileError, FileEvent, RemoteFileConfig, Result, SharedSink,
};
use tracing::{debug, info, instrument, warn};

use crate::backup::BackupManager;
use crate::managed::ManagedFile;
use crate::store::FileStore;
use crate::trigger::{action, Trigger};

#[derive(Debug)]
struct CacheState<T> {
    data: Option<T>,
    /// Hash of the encoded cached value.
    current_hash: Option<String>,
    /// Hash of the encoded value at the last load or successful save.
    saved_hash: Option<String>,
    /// Hash of the bytes on disk as of the last load or successful save.
    disk_hash: Option<String>,
    /// Hash of the bytes copied by the most recent backup.
    backed_up_hash: Option<String>,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            data: None,
            current_hash: None,
            saved_hash: None,
            disk_hash: None,
            backed_up_hash: None,
        }
    }
}

pub struct FileManager<T> {
    path: PathBuf,
    codec: Arc<dyn Codec<T>>,
    store: FileStore,
    backups: BackupManager,
    sink: SharedSink,
    remote: Option<RemoteFileConfig>,
    auto_save: AtomicBool,
    recoverable: bool,
    state: RwLock<CacheState<T>>,
}

impl<T> std::fmt::Debug for FileManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("path", &self.path)
            .field("remote", &self.remote)
            .field("auto_save", &self.auto_save)
            .finish_non_exhaustive()
    }
}

impl<T> FileManager<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        path: impl Into<PathBuf>,
        codec: Arc<dyn Codec<T>>,
        store: FileStore,
        backups: BackupManager,
        sink: SharedSink,
    ) -> Self {
        Self {
            path: path.into(),
            codec,
            store,
            backups,
            sink,
            remote: None,
            auto_save: AtomicBool::new(true),
            recoverable: true,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn with_remote(mut self, config: RemoteFileConfig) -> Self {
        self.remote = Some(config);
        self
    }

    /// Exclude this file from crash recovery.
    pub fn without_recovery(mut self) -> Self {
        self.recoverable = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState<T>> {
        self.state.read().expect("file manager state poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState<T>> {
        self.state.write().expect("file manager state poisoned")
    }

    pub fn is_loaded(&self) -> bool {
        self.read_state().data.is_some()
    }

    /// Read the file from disk into the cache. Clears the pending flag.
    #[instrument(skip(self, cancel), fields(path = %self.path.display()), level = "debug")]
    pub async fn load(&self, cancel: &CancelToken) -> Result<()> {
        let text = self.store.load_text(&self.path, cancel).await?;
        let value = self.codec.decode(&text)?;
        // Hash the canonical encoding so a reformatted file is not "pending".
        let hash = content_hash(self.codec.encode(&value)?.as_bytes());
        let disk_hash = content_hash(text.as_bytes());

        let seeded = if self.read_state().backed_up_hash.is_none() {
            self.latest_backup_hash(cancel).await
        } else {
            None
        };

        {
            let mut state = self.write_state();
            state.data = Some(value);
            state.current_hash = Some(hash.clone());
            state.saved_hash = Some(hash);
            state.disk_hash = Some(disk_hash);
            if state.backed_up_hash.is_none() {
                state.backed_up_hash = seeded;
            }
        }

        debug!("Loaded {}", self.path.display());
        self.sink.emit(FileEvent::Loaded {
            path: self.path.clone(),
        });
        Ok(())
    }

    /// Hash of the newest backup already on disk, so content that survived a
    /// restart is not copied again.
    async fn latest_backup_hash(&self, cancel: &CancelToken) -> Option<String> {
        let latest = self.backups.latest_backup(&self.path).await.ok()?;
        match self.store.load_bytes(&latest.path, cancel).await {
            Ok(bytes) => Some(content_hash(&bytes)),
            Err(e) => {
                debug!("Could not read {}: {}", latest.path.display(), e);
                None
            }
        }
    }

    pub async fn reload(&self, cancel: &CancelToken) -> Result<()> {
        self.load(cancel).await
    }

    /// Load the file, or seed the cache with `default` and persist it when the
    /// file does not exist yet.
    pub async fn load_or_init(&self, default: T, cancel: &CancelToken) -> Result<()> {
        match self.load(cancel).await {
            Err(FileError::NotFound(_)) => {
                info!("{} not found, creating it", self.path.display());
                self.set_data(default)?;
                self.save(cancel).await
            }
            other => other,
        }
    }

    /// Persist the cached value. The pending flag is cleared only if the cache
    /// was not modified while the write was in flight.
    #[instrument(skip(self, cancel), fields(path = %self.path.display()), level = "debug")]
    pub async fn save(&self, cancel: &CancelToken) -> Result<()> {
        let (text, hash) = {
            let state = self.read_state();
            let data = state.data.as_ref().ok_or_else(|| {
                FileError::NotFound(format!("No data loaded for {}", self.path.display()))
            })?;
            let text = self.codec.encode(data)?;
            let hash = content_hash(text.as_bytes());
            (text, hash)
        };

        self.store.save_text(&self.path, &text, cancel).await?;

        // Pending is derived from current != saved, so a concurrent edit keeps
        // the file pending.
        {
            let mut state = self.write_state();
            state.disk_hash = Some(hash.clone());
            state.saved_hash = Some(hash);
        }

        debug!("Saved {}", self.path.display());
        self.sink.emit(FileEvent::Saved {
            path: self.path.clone(),
        });
        Ok(())
    }

    /// Clone of the cached value.
    pub fn data(&self) -> Option<T>
    where
        T: Clone,
    {
        self.read_state().data.clone()
    }

    /// Borrow the cached value for the duration of `f`.
    pub fn with_data<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.read_state().data.as_ref().map(f)
    }

    /// Replace the cached value.
    pub fn set_data(&self, value: T) -> Result<()> {
        let hash = content_hash(self.codec.encode(&value)?.as_bytes());
        let mut state = self.write_state();
        state.data = Some(value);
        state.current_hash = Some(hash);
        Ok(())
    }

    /// Mutate the cached value in place. Fails with `NotFound` if nothing is
    /// loaded.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut state = self.write_state();
        let data = state.data.as_mut().ok_or_else(|| {
            FileError::NotFound(format!("No data loaded for {}", self.path.display()))
        })?;
        let out = f(data);
        let hash = content_hash(self.codec.encode(data)?.as_bytes());
        state.current_hash = Some(hash);
        Ok(out)
    }

    pub fn set_auto_save_enabled(&self, enabled: bool) {
        self.auto_save.store(enabled, Ordering::SeqCst);
    }

    pub fn is_auto_save_enabled(&self) -> bool {
        self.auto_save.load(Ordering::SeqCst)
    }

    pub fn has_pending_auto_save(&self) -> bool {
        let state = self.read_state();
        state.data.is_some() && state.current_hash != state.saved_hash
    }

    /// Whether the file on disk holds content no backup has captured yet.
    /// Unsaved edits do not count until they are written.
    pub fn has_changes_since_backup(&self) -> bool {
        let state = self.read_state();
        state.disk_hash.is_some() && state.disk_hash != state.backed_up_hash
    }

    /// Check that `bytes` decode with this file's codec.
    pub fn validate(&self, bytes: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            FileError::format(format!("{} is not valid UTF-8", self.path.display()), e)
        })?;
        self.codec.decode(text).map(|_| ())
    }

    pub fn remote_config(&self) -> Option<&RemoteFileConfig> {
        self.remote.as_ref()
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Back up the file on disk if its content changed since the last backup.
    pub async fn backup_now(&self, cancel: &CancelToken) -> Result<Option<PathBuf>> {
        let disk_hash = {
            let state = self.read_state();
            if state.disk_hash.is_none() || state.disk_hash == state.backed_up_hash {
                debug!("No changes since last backup of {}", self.path.display());
                return Ok(None);
            }
            state.disk_hash.clone()
        };

        match self.backups.create_backup(&self.path, cancel).await {
            Ok(backup) => {
                // A save racing the copy only costs one redundant backup later.
                self.write_state().backed_up_hash = disk_hash;
                self.sink.emit(FileEvent::BackupCreated {
                    source: self.path.clone(),
                    backup: backup.clone(),
                });
                Ok(Some(backup))
            }
            Err(e) => {
                self.sink.emit(FileEvent::BackupFailed {
                    source: self.path.clone(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Restore the latest backup over the working copy and reload it.
    #[instrument(skip(self, cancel), fields(path = %self.path.display()), level = "debug")]
    pub async fn rollback(&self, cancel: &CancelToken) -> Result<PathBuf> {
        let latest = self.backups.latest_backup(&self.path).await?;
        self.backups.restore(&latest.path, &self.path, cancel).await?;
        self.load(cancel).await?;
        {
            let state = &mut *self.write_state();
            state.backed_up_hash = state.disk_hash.clone();
        }

        info!(
            "Rolled back {} to {}",
            self.path.display(),
            latest.path.display()
        );
        self.sink.emit(FileEvent::Rollback {
            path: self.path.clone(),
            backup: latest.path.clone(),
        });
        Ok(latest.path)
    }

    /// Register `trigger` to run `backup_now` for this file. The trigger holds
    /// only a weak reference.
    pub fn attach_trigger(self: &Arc<Self>, trigger: &Trigger) {
        let weak = Arc::downgrade(self);
        trigger.register(
            &self.path,
            action(move || {
                let weak = weak.clone();
                async move {
                    let Some(manager) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = manager.backup_now(&CancelToken::none()).await {
                        warn!(
                            "Scheduled backup of {} failed: {}",
                            manager.path.display(),
                            e
                        );
                    }
                }
            }),
        );
    }
}

#[async_trait]
impl<T> ManagedFile for FileManager<T>
where
    T: Send + Sync + 'static,
{
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_pending_auto_save(&self) -> bool {
        FileManager::has_pending_auto_save(self)
    }

    fn has_changes_since_backup(&self) -> bool {
        FileManager::has_changes_since_backup(self)
    }

    fn is_auto_save_enabled(&self) -> bool {
        FileManager::is_auto_save_enabled(self)
    }

    fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    fn is_structured(&self) -> bool {
        self.codec.is_structured()
    }

    fn remote_config(&self) -> Option<&RemoteFileConfig> {
        self.remote.as_ref()
    }

    fn backups(&self) -> &BackupManager {
        &self.backups
    }

    fn store(&self) -> &FileStore {
        &self.store
    }

    fn validate(&self, bytes: &[u8]) -> Result<()> {
        FileManager::validate(self, bytes)
    }

    async fn save(&self, cancel: &CancelToken) -> Result<()> {
        FileManager::save(self, cancel).await
    }

    async fn reload(&self, cancel: &CancelToken) -> Result<()> {
        FileManager::reload(self, cancel).await
    }

    async fn backup_now(&self, cancel: &CancelToken) -> Result<Option<PathBuf>> {
        FileManager::backup_now(self, cancel).await
    }
}
