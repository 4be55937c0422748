//! Storage backends a backup tree runs against.

use std::sync::Arc;
use std::time::Duration;

use ferry_sync::device::FileDeviceOpener;
use ferry_sync::store::memory::{MemoryDestination, MemorySource};
use ferry_sync::store::rbd::RbdCli;
use ferry_sync::store::zfs::ZfsCli;
use ferry_sync::store::{DestinationStore, DeviceOpener, SourceConnector};
use ferry_sync::SyncOptions;

/// Source connector, destination store and device opener, plus the device
/// open retry policy.
#[derive(Clone)]
pub struct Backends {
    pub source: Arc<dyn SourceConnector>,
    pub destination: Arc<dyn DestinationStore>,
    pub opener: Arc<dyn DeviceOpener>,
    pub open_attempts: u32,
    pub retry_delay: Duration,
}

impl Backends {
    /// `rbd` and `zfs` from `PATH`, writing to real device nodes.
    pub fn system() -> Self {
        let defaults = SyncOptions::default();
        Self {
            source: Arc::new(RbdCli::default()),
            destination: Arc::new(ZfsCli::default()),
            opener: Arc::new(FileDeviceOpener),
            open_attempts: defaults.open_attempts,
            retry_delay: defaults.retry_delay,
        }
    }

    /// In-memory stores; device opens are retried without delay.
    pub fn memory(source: MemorySource, destination: MemoryDestination) -> Self {
        Self {
            source: Arc::new(source),
            destination: Arc::new(destination.clone()),
            opener: Arc::new(destination),
            open_attempts: SyncOptions::default().open_attempts,
            retry_delay: Duration::ZERO,
        }
    }

    pub(crate) fn sync_options(&self, snapshot_prefix: &str) -> SyncOptions {
        SyncOptions {
            snapshot_prefix: snapshot_prefix.to_string(),
            open_attempts: self.open_attempts,
            retry_delay: self.retry_delay,
        }
    }
}
