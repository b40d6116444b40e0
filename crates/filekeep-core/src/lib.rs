//! Core traits and types for filekeep.
//!
//! This crate defines the abstractions shared by the local persistence engine and
//! the remote synchronization backends:
//! - `Codec`: typed value to text serialization (JSON reference implementation)
//! - `EventSink`: narrow event-emission capability for lifecycle notifications
//! - `FileError`: the failure taxonomy every fallible operation returns
//! - `diff`: path-addressed structural comparison of two JSON documents
//! - `hash`: content hashing for change detection
//! - `Clock` and `CancelToken`: time and cancellation seams for background work

pub mod cancel;
pub mod clock;
pub mod codec;
pub mod config;
pub mod diff;
mod error;
pub mod events;
pub mod hash;

pub use cancel::{CancelSource, CancelToken};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use codec::{Codec, JsonCodec};
pub use config::{BackupOptions, RemoteFileConfig};
pub use diff::{diff, diff_values, DiffEntry, DiffKind, DiffReport};
pub use error::{FileError, Result};
pub use events::{ChannelSink, EventSink, FileEvent, NullSink, SharedSink, TracingSink};
