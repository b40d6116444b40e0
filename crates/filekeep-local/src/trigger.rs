//! Scheduling policies that invoke a backup action.
//!
//! A `Trigger` is either a periodic `Interval` timer or a `Combined` list of
//! child triggers that receive every lifecycle call in order. Lifecycle:
//! `register` → `unregister` → `dispose`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Action a trigger runs each time it fires.
pub type TriggerAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a `TriggerAction`.
pub fn action<F, Fut>(f: F) -> TriggerAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

#[derive(Debug, Default)]
struct IntervalState {
    task: Option<JoinHandle<()>>,
    owner: Option<PathBuf>,
    disposed: bool,
}

/// Fires on a periodic timer after an initial delay.
#[derive(Debug)]
pub struct IntervalTrigger {
    interval: Duration,
    start_delay: Duration,
    state: Mutex<IntervalState>,
}

impl IntervalTrigger {
    pub fn new(interval: Duration) -> Self {
        Self::with_delay(interval, interval)
    }

    pub fn with_delay(interval: Duration, start_delay: Duration) -> Self {
        Self {
            interval,
            start_delay,
            state: Mutex::new(IntervalState::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start_delay(&self) -> Duration {
        self.start_delay
    }

    fn state(&self) -> std::sync::MutexGuard<'_, IntervalState> {
        self.state.lock().expect("trigger state poisoned")
    }

    /// Must be called from within a tokio runtime.
    fn register(&self, owner: &Path, action: TriggerAction) {
        let mut state = self.state();
        if state.disposed {
            warn!("Ignoring register on disposed trigger for {}", owner.display());
            return;
        }
        if state.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Trigger for {} already active", owner.display());
            return;
        }
        if self.interval.is_zero() {
            warn!("Ignoring zero-length interval trigger for {}", owner.display());
            return;
        }

        let period = self.interval;
        let start = Instant::now() + self.start_delay;
        let label = owner.to_path_buf();
        state.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                debug!("Interval trigger fired for {}", label.display());
                action().await;
            }
        }));
        state.owner = Some(owner.to_path_buf());
        debug!(
            "Registered interval trigger for {} (every {:?}, first in {:?})",
            owner.display(),
            self.interval,
            self.start_delay
        );
    }

    fn unregister(&self) {
        let mut state = self.state();
        if let Some(task) = state.task.take() {
            task.abort();
            if let Some(owner) = &state.owner {
                debug!("Unregistered interval trigger for {}", owner.display());
            }
        }
    }

    fn dispose(&self) {
        self.unregister();
        self.state().disposed = true;
    }

    fn is_active(&self) -> bool {
        self.state()
            .task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for IntervalTrigger {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(task) = state.task.take() {
                task.abort();
            }
        }
    }
}

/// Backup scheduling policy.
#[derive(Debug)]
pub enum Trigger {
    Interval(IntervalTrigger),
    Combined(Vec<Trigger>),
}

impl Trigger {
    /// Interval trigger whose first firing is one interval from now.
    pub fn interval(interval: Duration) -> Self {
        Self::Interval(IntervalTrigger::new(interval))
    }

    pub fn interval_with_delay(interval: Duration, start_delay: Duration) -> Self {
        Self::Interval(IntervalTrigger::with_delay(interval, start_delay))
    }

    pub fn combined(children: Vec<Trigger>) -> Self {
        Self::Combined(children)
    }

    /// Start invoking `action` on behalf of `owner`. No-op if already active.
    pub fn register(&self, owner: &Path, action: TriggerAction) {
        match self {
            Self::Interval(t) => t.register(owner, action),
            Self::Combined(children) => {
                for child in children {
                    child.register(owner, action.clone());
                }
            }
        }
    }

    /// Stop firing; the trigger can be registered again.
    pub fn unregister(&self) {
        match self {
            Self::Interval(t) => t.unregister(),
            Self::Combined(children) => children.iter().for_each(Trigger::unregister),
        }
    }

    /// Stop firing for good.
    pub fn dispose(&self) {
        match self {
            Self::Interval(t) => t.dispose(),
            Self::Combined(children) => children.iter().for_each(Trigger::dispose),
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            Self::Interval(t) => t.is_active(),
            Self::Combined(children) => children.iter().any(Trigger::is_active),
        }
    }
}
