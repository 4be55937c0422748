//! # ferry-backup
//!
//! Job composition: validated job configuration and the three-level task
//! tree (root → job → volume) that drives the synchronizer.
//!
//! ```text
//! root
//! ├── job "vms"      (one source pool → one destination base path)
//! │   ├── vm-1       (one backup cycle + retention)
//! │   └── vm-2
//! └── job "db"
//! ```
//!
//! Jobs rediscover their volumes on every prepare; volume tasks are reused
//! by name so their status history survives.

pub mod backends;
pub mod config;
pub mod job;
mod progress;
pub mod root;
pub mod tree;
pub mod volume;

pub use backends::Backends;
pub use config::{build, load, parse_schedule, BackupConfig, JobConfig};
pub use job::{JobBody, JobTask};
pub use root::{RootBody, RootTask};
pub use tree::{BackupTree, ROOT_ID};
pub use volume::{SharedPool, VolumeBody, VolumeTask};
