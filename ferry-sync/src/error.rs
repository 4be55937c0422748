//! Error types for ferry-sync.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An external tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully.
    #[error("{command} failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    /// I/O on a device node or file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tool output did not have the expected shape.
    #[error("unexpected output from {what}: {reason}")]
    Parse { what: String, reason: String },

    /// A pool, volume, snapshot or device does not exist.
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The volume is busy (e.g. a writer still holds its device open).
    #[error("{0} is busy")]
    Busy(String),

    /// Access outside the volume bounds.
    #[error("range {offset}+{length} is outside volume {volume} of size {size}")]
    OutOfRange {
        volume: String,
        offset: u64,
        length: u64,
        size: u64,
    },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// One backup cycle failed. Variants follow the stage that failed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Cannot reach the source or destination store.
    #[error("cannot connect to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: StoreError,
    },

    /// Cannot enumerate volumes or snapshots.
    #[error("cannot list {what}: {source}")]
    Discovery {
        what: String,
        #[source]
        source: StoreError,
    },

    /// Cannot create or grow the destination volume.
    #[error("cannot provision destination volume {volume}: {source}")]
    Provisioning {
        volume: String,
        #[source]
        source: StoreError,
    },

    /// The destination device node stayed unavailable.
    #[error("cannot open device {path} after {attempts} attempts: {source}")]
    DeviceAccess {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Read, write or discard failed mid-stream.
    #[error("copy failed at {offset}+{length}: {source}")]
    Copy {
        offset: u64,
        length: u64,
        #[source]
        source: StoreError,
    },

    /// The copied data could not be flushed to the device.
    #[error("cannot flush device {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    /// Cannot create, activate, roll back to or delete a snapshot.
    #[error("snapshot {name}: {source}")]
    Snapshot {
        name: String,
        #[source]
        source: StoreError,
    },

    /// The cycle was cancelled before it completed.
    #[error("cancelled")]
    Cancelled,
}
