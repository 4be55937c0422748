//! # ferry-sync
//!
//! Volume synchronizer: one incremental backup cycle per volume, followed by
//! retention on both sides.
//!
//! The storage backends are consumed through the traits in [`store`]. All of
//! them are blocking; async callers run a cycle inside
//! `tokio::task::spawn_blocking`.

pub mod device;
pub mod error;
pub mod naming;
pub mod progress;
pub mod retention;
pub mod store;
pub mod synchronizer;

pub use error::{StoreError, SyncError};
pub use naming::{snapshot_name, unique_snapshot_name};
pub use progress::{Phase, Progress, Silent};
pub use retention::{apply_retention, PruneReport};
pub use synchronizer::{Reconciliation, SyncOptions, SyncReport, Synchronizer};
