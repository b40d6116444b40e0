//! Path-keyed collection of managed files owned by the composition root.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::managed::SharedFile;

#[derive(Default)]
pub struct FileRegistry {
    files: DashMap<PathBuf, SharedFile>,
}

impl std::fmt::Debug for FileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRegistry")
            .field("len", &self.files.len())
            .finish()
    }
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `file` under its path. A file already registered at that path is
    /// replaced and returned.
    pub fn register(&self, file: SharedFile) -> Option<SharedFile> {
        let path = file.path().to_path_buf();
        let previous = self.files.insert(path.clone(), file);
        if previous.is_some() {
            warn!("Replacing managed file already registered at {}", path.display());
        } else {
            debug!("Registered {}", path.display());
        }
        previous
    }

    pub fn unregister(&self, path: &Path) -> Option<SharedFile> {
        let removed = self.files.remove(path).map(|(_, file)| file);
        if removed.is_some() {
            debug!("Unregistered {}", path.display());
        }
        removed
    }

    pub fn get(&self, path: &Path) -> Option<SharedFile> {
        self.files.get(path).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Snapshot of every registered file, ordered by path.
    pub fn files(&self) -> Vec<SharedFile> {
        let mut files: Vec<SharedFile> = self
            .files
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        files.sort_by(|a, b| a.path().cmp(b.path()));
        files
    }

    /// Files with auto-save enabled and unsaved changes.
    pub fn pending_auto_save(&self) -> Vec<SharedFile> {
        self.select(|f| f.is_auto_save_enabled() && f.has_pending_auto_save())
    }

    /// Files configured with a remote source.
    pub fn remote_enabled(&self) -> Vec<SharedFile> {
        self.select(|f| f.remote_config().is_some())
    }

    fn select(&self, keep: impl Fn(&SharedFile) -> bool) -> Vec<SharedFile> {
        self.files().into_iter().filter(|f| keep(f)).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
