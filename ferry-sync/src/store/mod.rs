//! Storage capabilities consumed by the synchronizer.
//!
//! Source and destination snapshots are correlated by name only. Everything
//! here is blocking.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use ferry_core::{ClusterConfig, Snapshot};

use crate::error::StoreError;

pub(crate) mod command;
pub mod memory;
pub mod rbd;
pub mod zfs;

/// A contiguous byte range reported by a diff, tagged as data or hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
    pub has_data: bool,
}

impl Extent {
    pub fn data(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            has_data: true,
        }
    }

    pub fn hole(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            has_data: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Source side
// ---------------------------------------------------------------------------

/// Opens a pool on a source cluster.
pub trait SourceConnector: Send + Sync {
    fn connect(&self, cluster: &ClusterConfig, pool: &str)
        -> Result<Box<dyn SourcePool>, StoreError>;
}

/// A connected pool of source volumes.
pub trait SourcePool: Send {
    fn volume_names(&self) -> Result<Vec<String>, StoreError>;

    fn open_volume(&self, name: &str) -> Result<Box<dyn SourceVolume>, StoreError>;
}

/// One source volume.
pub trait SourceVolume: Send {
    fn name(&self) -> &str;

    fn size(&self) -> Result<u64, StoreError>;

    /// Snapshot names, oldest first.
    fn snapshot_names(&self) -> Result<Vec<String>, StoreError>;

    fn snapshots(&self) -> Result<Vec<Snapshot>, StoreError>;

    /// Create `name` and make subsequent reads and diffs see that snapshot.
    fn create_and_activate_snapshot(&mut self, name: &str) -> Result<(), StoreError>;

    /// Report the extents that changed between `from` (exclusive, `None` for
    /// a base copy) and the active snapshot. Iteration stops early when the
    /// visitor breaks.
    fn diff_extents(
        &self,
        from: Option<&str>,
        visit: &mut dyn FnMut(Extent) -> ControlFlow<()>,
    ) -> Result<(), StoreError>;

    /// Read from the active snapshot.
    fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>, StoreError>;

    fn delete_snapshot(&mut self, name: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Destination side
// ---------------------------------------------------------------------------

/// Provisions destination volumes under a base path.
pub trait DestinationStore: Send + Sync {
    /// Open `base/name`, creating it if absent and growing it if smaller
    /// than `min_size`. Never shrinks.
    fn open_or_create_volume(
        &self,
        base: &str,
        name: &str,
        min_size: u64,
    ) -> Result<Box<dyn DestinationVolume>, StoreError>;
}

/// One destination volume.
pub trait DestinationVolume: Send {
    /// Full path of the volume, e.g. `tank/backups/vm-1`.
    fn name(&self) -> &str;

    fn snapshots(&self) -> Result<Vec<Snapshot>, StoreError>;

    /// Discard all state newer than `snapshot`, including later snapshots.
    fn rollback_to(&mut self, snapshot: &str) -> Result<(), StoreError>;

    fn device_path(&self) -> PathBuf;

    fn create_snapshot(&mut self, name: &str) -> Result<(), StoreError>;

    fn delete_snapshot(&mut self, name: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Block devices
// ---------------------------------------------------------------------------

/// Opens a raw block device node for writing.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn BlockDevice>, StoreError>;
}

/// A writable block device.
pub trait BlockDevice: Send {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), StoreError>;

    /// Release the range so it reads back as zeroes without storing them.
    fn discard(&mut self, offset: u64, length: u64) -> Result<(), StoreError>;

    /// Flush and close. The device must not be used afterwards.
    fn close(self: Box<Self>) -> Result<(), StoreError>;
}
