//! Per-path reader/writer locks.
//!
//! Each path gets its own `tokio::sync::RwLock`, created on first use. Unrelated
//! files never contend; readers of one file run together and wait out a writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

/// Lock table keyed by path.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<PathBuf, Arc<RwLock<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a path.
    fn entry(&self, path: &Path) -> Arc<RwLock<()>> {
        self.locks
            .entry(normalize(path))
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Shared access; released when the guard drops.
    pub async fn read(&self, path: &Path) -> OwnedRwLockReadGuard<()> {
        let lock = self.entry(path);
        trace!("Acquiring read lock on {}", path.display());
        lock.read_owned().await
    }

    /// Exclusive access; released when the guard drops.
    pub async fn write(&self, path: &Path) -> OwnedRwLockWriteGuard<()> {
        let lock = self.entry(path);
        trace!("Acquiring write lock on {}", path.display());
        lock.write_owned().await
    }

    /// Number of paths that have been locked at least once.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Best-effort canonical key so `a/./b.json` and `a/b.json` share a lock.
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_readers_share_access() {
        let locks = PathLocks::new();
        let path = Path::new("/data/a.json");

        let r1 = locks.read(path).await;
        let r2 = tokio::time::timeout(Duration::from_millis(50), locks.read(path))
            .await
            .expect("second reader must not wait");
        drop((r1, r2));
    }

    #[tokio::test]
    async fn test_writer_excludes_readers() {
        let locks = PathLocks::new();
        let path = Path::new("/data/a.json");

        let writer = locks.write(path).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.read(path)).await;
        assert!(blocked.is_err(), "reader must wait for the writer");

        drop(writer);
        let _reader = locks.read(path).await;
    }

    #[tokio::test]
    async fn test_unrelated_paths_do_not_contend() {
        let locks = PathLocks::new();
        let _a = locks.write(Path::new("/data/a.json")).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.write(Path::new("/data/b.json")))
            .await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_equivalent_paths_share_a_lock() {
        let locks = PathLocks::new();
        let _w = locks.write(Path::new("/data/./a.json")).await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.read(Path::new("/data/a.json"))).await;
        assert!(blocked.is_err());
        assert_eq!(locks.len(), 1);
    }
}
