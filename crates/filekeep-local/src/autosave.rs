//! Periodic flush of managed files with unsaved changes.
//!
//! Each tick takes a non-blocking guard; a tick that finds the previous one
//! still running is skipped, never queued. Selected files are saved
//! concurrently and failures leave their pending flag set for the next tick.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filekeep_core::{CancelToken, FileEvent, SharedSink};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::registry::FileRegistry;

pub const DEFAULT_AUTO_SAVE_INTERVAL: Duration = Duration::from_millis(500);

/// Per-file results of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoSaveSummary {
    pub saved: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl AutoSaveSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,
    /// Nothing was pending.
    Idle,
    Completed(AutoSaveSummary),
}

struct Inner {
    registry: Arc<FileRegistry>,
    sink: SharedSink,
    guard: tokio::sync::Mutex<()>,
}

impl Inner {
    async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("Auto-save tick skipped, previous tick still running");
            return TickOutcome::Skipped;
        };

        let pending = self.registry.pending_auto_save();
        if pending.is_empty() {
            return TickOutcome::Idle;
        }

        self.sink.emit(FileEvent::AutoSaveStarted {
            count: pending.len(),
        });
        debug!("Auto-saving {} file(s)", pending.len());

        let tasks = pending.into_iter().map(|file| {
            let path = file.path().to_path_buf();
            let handle = tokio::spawn(async move { file.save(&CancelToken::none()).await });
            async move { (path, handle.await) }
        });

        let mut summary = AutoSaveSummary::default();
        for (path, joined) in join_all(tasks).await {
            let failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(format!("auto-save task failed: {}", e)),
            };
            match failure {
                None => {
                    self.sink.emit(FileEvent::AutoSaveCompleted { path: path.clone() });
                    summary.saved.push(path);
                }
                Some(message) => {
                    warn!("Auto-save of {} failed: {}", path.display(), message);
                    self.sink.emit(FileEvent::AutoSaveFailed {
                        path: path.clone(),
                        message: message.clone(),
                    });
                    summary.failed.push((path, message));
                }
            }
        }

        info!(
            "Auto-save tick: {} saved, {} failed",
            summary.saved.len(),
            summary.failed.len()
        );
        TickOutcome::Completed(summary)
    }
}

/// Runs auto-save ticks over a registry on a periodic timer.
pub struct AutoSaveScheduler {
    inner: Arc<Inner>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AutoSaveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoSaveScheduler")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl AutoSaveScheduler {
    pub fn new(registry: Arc<FileRegistry>, sink: SharedSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                sink,
                guard: tokio::sync::Mutex::new(()),
            }),
            ticker: Mutex::new(None),
        }
    }

    fn ticker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().expect("auto-save ticker poisoned")
    }

    /// Start ticking every `interval`. Returns false if already running.
    pub fn start(&self, interval: Duration) -> bool {
        let mut ticker = self.ticker();
        if ticker.as_ref().is_some_and(|t| !t.is_finished()) {
            info!("Auto-save scheduler already running");
            return false;
        }
        if interval.is_zero() {
            warn!("Refusing to start auto-save with a zero interval");
            return false;
        }

        let inner = self.inner.clone();
        *ticker = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                inner.tick().await;
            }
        }));
        info!("Auto-save scheduler started (every {:?})", interval);
        true
    }

    /// Stop the ticker. In-flight saves run to completion. Returns false if it
    /// was not running.
    pub fn stop(&self) -> bool {
        match self.ticker().take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                info!("Auto-save scheduler stopped");
                true
            }
            _ => {
                info!("Auto-save scheduler not running");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Run one tick immediately, subject to the same overlap guard.
    pub async fn execute_now(&self) -> TickOutcome {
        self.inner.tick().await
    }
}

impl Drop for AutoSaveScheduler {
    fn drop(&mut self) {
        if let Ok(ticker) = self.ticker.get_mut() {
            if let Some(task) = ticker.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupManager;
    use crate::managed::ManagedFile;
    use crate::store::FileStore;
    use async_trait::async_trait;
    use filekeep_core::{
        BackupOptions, ChannelSink, FileError, NullSink, RemoteFileConfig, Result,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    enum Behavior {
        Succeed,
        Fail,
        Panic,
        WaitFor(Arc<Notify>),
    }

    struct StubFile {
        path: PathBuf,
        pending: AtomicBool,
        saves: AtomicUsize,
        behavior: Behavior,
        backups: BackupManager,
        store: FileStore,
    }

    impl StubFile {
        fn new(path: &str, behavior: Behavior) -> Arc<Self> {
            let store = FileStore::new();
            Arc::new(Self {
                path: PathBuf::from(path),
                pending: AtomicBool::new(true),
                saves: AtomicUsize::new(0),
                behavior,
                backups: BackupManager::new(BackupOptions::default(), store.clone()),
                store,
            })
        }
    }

    #[async_trait]
    impl ManagedFile for StubFile {
        fn path(&self) -> &Path {
            &self.path
        }
        fn has_pending_auto_save(&self) -> bool {
            self.pending.load(Ordering::SeqCst)
        }
        fn has_changes_since_backup(&self) -> bool {
            false
        }
        fn is_auto_save_enabled(&self) -> bool {
            true
        }
        fn is_structured(&self) -> bool {
            false
        }
        fn remote_config(&self) -> Option<&RemoteFileConfig> {
            None
        }
        fn backups(&self) -> &BackupManager {
            &self.backups
        }
        fn store(&self) -> &FileStore {
            &self.store
        }
        fn validate(&self, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn save(&self, _cancel: &CancelToken) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => {}
                Behavior::Fail => return Err(FileError::io_msg("disk full")),
                Behavior::Panic => panic!("save exploded"),
                Behavior::WaitFor(gate) => gate.notified().await,
            }
            self.pending.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn reload(&self, _cancel: &CancelToken) -> Result<()> {
            Ok(())
        }
        async fn backup_now(&self, _cancel: &CancelToken) -> Result<Option<PathBuf>> {
            Ok(None)
        }
    }

    fn scheduler_with(files: &[Arc<StubFile>], sink: SharedSink) -> AutoSaveScheduler {
        let registry = Arc::new(FileRegistry::new());
        for file in files {
            registry.register(file.clone());
        }
        AutoSaveScheduler::new(registry, sink)
    }

    #[tokio::test]
    async fn test_idle_when_nothing_pending() {
        let (sink, mut rx) = ChannelSink::new();
        let file = StubFile::new("/tmp/a.json", Behavior::Succeed);
        file.pending.store(false, Ordering::SeqCst);
        let scheduler = scheduler_with(&[file.clone()], Arc::new(sink));

        assert_eq!(scheduler.execute_now().await, TickOutcome::Idle);
        assert_eq!(file.saves.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mixed_outcomes_are_aggregated() {
        let (sink, mut rx) = ChannelSink::new();
        let ok = StubFile::new("/tmp/ok.json", Behavior::Succeed);
        let bad = StubFile::new("/tmp/bad.json", Behavior::Fail);
        let boom = StubFile::new("/tmp/boom.json", Behavior::Panic);
        let scheduler = scheduler_with(&[ok.clone(), bad.clone(), boom.clone()], Arc::new(sink));

        let TickOutcome::Completed(summary) = scheduler.execute_now().await else {
            panic!("expected a completed tick");
        };
        assert_eq!(summary.saved, vec![PathBuf::from("/tmp/ok.json")]);
        assert_eq!(summary.failed.len(), 2);
        assert!(!summary.is_success());

        assert!(!ok.has_pending_auto_save());
        assert!(bad.has_pending_auto_save());
        assert!(boom.has_pending_auto_save());

        assert_eq!(rx.recv().await, Some(FileEvent::AutoSaveStarted { count: 3 }));
        let events: Vec<FileEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let failed = events
            .iter()
            .filter(|e| matches!(e, FileEvent::AutoSaveFailed { .. }))
            .count();
        assert_eq!(failed, 2);
        assert!(events.contains(&FileEvent::AutoSaveCompleted {
            path: PathBuf::from("/tmp/ok.json")
        }));
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let (sink, mut rx) = ChannelSink::new();
        let gate = Arc::new(Notify::new());
        let slow = StubFile::new("/tmp/slow.json", Behavior::WaitFor(gate.clone()));
        let scheduler = Arc::new(scheduler_with(&[slow.clone()], Arc::new(sink)));

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.execute_now().await }
        });
        assert_eq!(rx.recv().await, Some(FileEvent::AutoSaveStarted { count: 1 }));

        assert_eq!(scheduler.execute_now().await, TickOutcome::Skipped);

        gate.notify_one();
        let outcome = first.await.unwrap();
        assert!(matches!(outcome, TickOutcome::Completed(ref s) if s.saved.len() == 1));
        assert_eq!(slow.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let file = StubFile::new("/tmp/a.json", Behavior::Succeed);
        let scheduler = scheduler_with(&[file.clone()], Arc::new(NullSink));

        assert!(!scheduler.is_running());
        assert!(scheduler.start(DEFAULT_AUTO_SAVE_INTERVAL));
        assert!(!scheduler.start(DEFAULT_AUTO_SAVE_INTERVAL));
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(file.saves.load(Ordering::SeqCst), 1);
        assert!(!file.has_pending_auto_save());

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        assert!(!scheduler.is_running());

        file.pending.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(file.saves.load(Ordering::SeqCst), 1);
    }
}
