//! Remote synchronization backend for filekeep.
//!
//! Pulls managed files from a GitHub repository:
//! - `GitHubClient`: raw-content or authenticated contents API fetches
//! - `ApiLimiter`: token bucket for the authenticated API
//! - `RemoteSync`: hash compare, backup-then-replace, reload
//! - `RemotePoller`: one background poll loop per remote-enabled file

pub mod github;
pub mod poll;
pub mod sync;
pub mod throttle;

pub use github::GitHubClient;
pub use poll::RemotePoller;
pub use sync::{RemoteSync, SyncOutcome, SyncReport};
pub use throttle::{ApiLimiter, DEFAULT_REQUESTS_PER_HOUR};
