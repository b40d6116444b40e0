//! Local persistence engine for filekeep.
//!
//! - `FileStore`: atomic temp-then-rename writes behind per-path locks
//! - `BackupManager`: timestamped backups with count and age retention
//! - `Trigger`: backup scheduling policies
//! - `FileManager`: typed cache over one file, exposed as `ManagedFile`
//! - `FileRegistry`: the set of managed files owned by the host
//! - `AutoSaveScheduler`: periodic, non-overlapping flush of pending edits
//! - `CrashRecovery`: crash flag and restore-from-backup at startup

pub mod autosave;
pub mod backup;
pub mod lock;
pub mod managed;
pub mod manager;
pub mod recovery;
pub mod registry;
pub mod store;
pub mod trigger;

pub use autosave::{AutoSaveScheduler, AutoSaveSummary, TickOutcome, DEFAULT_AUTO_SAVE_INTERVAL};
pub use backup::{BackupEntry, BackupManager};
pub use lock::PathLocks;
pub use managed::{ManagedFile, SharedFile};
pub use manager::FileManager;
pub use recovery::{CrashRecovery, RecoveryReport, RestoredFile};
pub use registry::FileRegistry;
pub use store::FileStore;
pub use trigger::{action, IntervalTrigger, Trigger, TriggerAction};
