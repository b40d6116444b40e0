//! Background polling of remote-enabled files.
//!
//! One task per file calls `RemoteSync::sync` every `polling_interval`,
//! logging and continuing on failure, until the poller is stopped.

use std::sync::{Arc, Mutex};

use filekeep_core::{CancelSource, CancelToken};
use filekeep_local::{FileRegistry, SharedFile};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::sync::{RemoteSync, SyncOutcome};

pub struct RemotePoller {
    sync: Arc<RemoteSync>,
    cancel: CancelSource,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for RemotePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePoller")
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}

impl RemotePoller {
    pub fn new(sync: Arc<RemoteSync>) -> Self {
        Self {
            sync,
            cancel: CancelSource::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().expect("poller task list poisoned")
    }

    /// Start polling `file`. Returns false if it has no remote, the interval
    /// is zero, or the poller was already stopped.
    pub fn watch(&self, file: SharedFile) -> bool {
        let Some(config) = file.remote_config() else {
            return false;
        };
        if self.cancel.is_cancelled() {
            warn!("Poller stopped, not watching {}", file.path().display());
            return false;
        }
        let interval = config.polling_interval;
        if interval.is_zero() {
            warn!("Zero polling interval for {}, not watching", file.path().display());
            return false;
        }

        info!(
            "Polling {} for {} every {:?}",
            config.display_address(),
            file.path().display(),
            interval
        );
        let sync = self.sync.clone();
        let token = self.cancel.token();
        let task = tokio::spawn(poll_loop(sync, file, interval, token));
        self.tasks().push(task);
        true
    }

    /// Watch every remote-enabled file in `registry`. Returns how many were
    /// started.
    pub fn watch_all(&self, registry: &FileRegistry) -> usize {
        registry
            .remote_enabled()
            .into_iter()
            .filter(|file| self.watch(file.clone()))
            .count()
    }

    pub fn active(&self) -> usize {
        self.tasks().iter().filter(|t| !t.is_finished()).count()
    }

    /// Cancel every poll loop, including in-flight requests, and wait for the
    /// tasks to exit. The poller cannot be restarted.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks().drain(..).collect();
        let count = tasks.len();
        for joined in join_all(tasks).await {
            if let Err(e) = joined {
                warn!("Remote poll task ended abnormally: {}", e);
            }
        }
        debug!("Stopped {} remote poll task(s)", count);
    }
}

async fn poll_loop(
    sync: Arc<RemoteSync>,
    file: SharedFile,
    interval: std::time::Duration,
    cancel: CancelToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match sync.sync(file.as_ref(), &cancel).await {
            Ok(SyncOutcome::Updated { diff_entries, .. }) => {
                info!(
                    "Pulled remote update for {} ({} changes)",
                    file.path().display(),
                    diff_entries
                );
            }
            Ok(outcome) => debug!("Remote poll of {}: {:?}", file.path().display(), outcome),
            Err(e) if e.is_cancelled() => break,
            Err(e) => warn!("Remote poll of {} failed: {}", file.path().display(), e),
        }
    }
    debug!("Remote poll loop for {} exited", file.path().display());
}
