//! One incremental backup cycle for one volume.
//!
//! The cycle is strictly sequential:
//!
//! 1. size the source and provision the destination (grow-only)
//! 2. create and activate a fresh source snapshot
//! 3. find the newest source snapshot name that also exists on the destination
//! 4. roll the destination back to it
//! 5. open the destination device, with retries
//! 6. stream the extents changed since the common point, writing data and
//!    discarding holes
//! 7. flush and close the device, then snapshot the destination
//!
//! The cycle is blocking. Cancellation is checked between extents and while
//! waiting for the device node.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, SyncError};
use crate::naming::unique_snapshot_name;
use crate::progress::{Phase, Progress};
use crate::store::{BlockDevice, DestinationStore, DestinationVolume, DeviceOpener, SourceVolume};

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Tunables for one [`Synchronizer`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub snapshot_prefix: String,
    /// Total attempts at opening the destination device node.
    pub open_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            snapshot_prefix: "ferry".to_string(),
            open_attempts: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// How the starting point of a cycle was chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    /// Source snapshot names, oldest first, including the new one.
    pub source_snapshots: Vec<String>,
    /// Destination snapshot names before rollback, oldest first.
    pub destination_snapshots: Vec<String>,
    pub common: Option<String>,
    /// `"(base) -> new"` or `"common -> new"`.
    pub plan: String,
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub bytes_written: u64,
    pub bytes_discarded: u64,
    pub snapshot: String,
    pub common: Option<String>,
    pub audit: Reconciliation,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "Wrote {} bytes (trimmed {}) and created snapshot '{}'",
            self.bytes_written, self.bytes_discarded, self.snapshot
        )
    }
}

/// Runs backup cycles against one destination store.
#[derive(Clone)]
pub struct Synchronizer {
    destination: Arc<dyn DestinationStore>,
    opener: Arc<dyn DeviceOpener>,
    options: SyncOptions,
}

impl Synchronizer {
    pub fn new(
        destination: Arc<dyn DestinationStore>,
        opener: Arc<dyn DeviceOpener>,
        options: SyncOptions,
    ) -> Self {
        Self {
            destination,
            opener,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Back up `source` into `dest_base/<volume name>`.
    ///
    /// Returns the report and the destination volume handle so the caller
    /// can apply retention without reopening it.
    pub fn sync(
        &self,
        source: &mut dyn SourceVolume,
        dest_base: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        progress: &dyn Progress,
    ) -> Result<(SyncReport, Box<dyn DestinationVolume>), SyncError> {
        let volume = source.name().to_string();

        // -- provision -------------------------------------------------------
        let size = source.size().map_err(|e| SyncError::Discovery {
            what: format!("size of {volume}"),
            source: e,
        })?;
        let mut dest = self
            .destination
            .open_or_create_volume(dest_base, &volume, size)
            .map_err(|e| SyncError::Provisioning {
                volume: format!("{dest_base}/{volume}"),
                source: e,
            })?;

        let dest_names: Vec<String> = dest
            .snapshots()
            .map_err(|e| SyncError::Discovery {
                what: format!("snapshots of {}", dest.name()),
                source: e,
            })?
            .into_iter()
            .map(|s| s.name)
            .collect();
        let existing = source.snapshot_names().map_err(|e| SyncError::Discovery {
            what: format!("snapshots of {volume}"),
            source: e,
        })?;

        // -- snapshot source -------------------------------------------------
        let taken: Vec<String> = existing.iter().chain(&dest_names).cloned().collect();
        let snapshot = unique_snapshot_name(&self.options.snapshot_prefix, now, &taken);
        check_cancel(cancel)?;
        source
            .create_and_activate_snapshot(&snapshot)
            .map_err(|e| SyncError::Snapshot {
                name: format!("{volume}@{snapshot}"),
                source: e,
            })?;

        // -- reconcile -------------------------------------------------------
        let source_names = source.snapshot_names().map_err(|e| SyncError::Discovery {
            what: format!("snapshots of {volume}"),
            source: e,
        })?;
        let common = find_common(&source_names, &dest_names, &snapshot);
        let plan = format!(
            "{} -> {snapshot}",
            common.as_deref().unwrap_or("(base)")
        );
        progress.log(&format!("Plan: {plan}"));
        tracing::info!(volume = %volume, plan = %plan, "reconciled snapshots");

        let audit = Reconciliation {
            source_snapshots: source_names,
            destination_snapshots: dest_names,
            common: common.clone(),
            plan,
        };

        if let Some(common) = &common {
            progress.log(&format!("Most recent common snapshot: {common}"));
            progress.phase(Phase::Preparing, &format!("Reverting destination to {common}"));
            dest.rollback_to(common).map_err(|e| SyncError::Snapshot {
                name: format!("{}@{common}", dest.name()),
                source: e,
            })?;
        }

        // -- copy ------------------------------------------------------------
        progress.phase(Phase::Preparing, "Opening destination device node");
        let device_path = dest.device_path();
        let mut device = self.open_device(&device_path, cancel)?;

        progress.phase(Phase::Copying, "Copying data");
        let (bytes_written, bytes_discarded) = copy_extents(
            &*source,
            common.as_deref(),
            device.as_mut(),
            cancel,
            progress,
        )?;

        progress.phase(Phase::Finishing, "Flushing");
        device.close().map_err(|e| SyncError::Flush {
            path: device_path,
            source: e,
        })?;

        progress.phase(Phase::Finishing, "Snapshotting");
        dest.create_snapshot(&snapshot)
            .map_err(|e| SyncError::Snapshot {
                name: format!("{}@{snapshot}", dest.name()),
                source: e,
            })?;

        tracing::info!(
            volume = %volume,
            snapshot = %snapshot,
            written = bytes_written,
            discarded = bytes_discarded,
            "cycle complete"
        );
        let report = SyncReport {
            bytes_written,
            bytes_discarded,
            snapshot,
            common,
            audit,
        };
        Ok((report, dest))
    }

    /// Device nodes can lag behind volume creation or rollback.
    fn open_device(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn BlockDevice>, SyncError> {
        let attempts = self.options.open_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.opener.open(path) {
                Ok(device) => return Ok(device),
                Err(err) if attempt >= attempts => {
                    return Err(SyncError::DeviceAccess {
                        path: path.to_path_buf(),
                        attempts,
                        source: err,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        attempt,
                        error = %err,
                        "device not ready, retrying"
                    );
                    sleep_unless_cancelled(self.options.retry_delay, cancel)?;
                    attempt += 1;
                }
            }
        }
    }
}

/// The newest name in `source` (oldest first) that the destination also has.
/// `new` is never common: it was created for this cycle.
pub fn find_common(source: &[String], destination: &[String], new: &str) -> Option<String> {
    let on_dest: HashSet<&str> = destination.iter().map(String::as_str).collect();
    source
        .iter()
        .rev()
        .filter(|name| name.as_str() != new)
        .find(|name| on_dest.contains(name.as_str()))
        .cloned()
}

fn copy_extents(
    source: &dyn SourceVolume,
    from: Option<&str>,
    device: &mut dyn BlockDevice,
    cancel: &CancellationToken,
    progress: &dyn Progress,
) -> Result<(u64, u64), SyncError> {
    let mut written = 0u64;
    let mut discarded = 0u64;
    let mut failure: Option<SyncError> = None;

    let listed = source.diff_extents(from, &mut |extent| {
        if cancel.is_cancelled() {
            failure = Some(SyncError::Cancelled);
            return ControlFlow::Break(());
        }
        let result: Result<(), StoreError> = if extent.has_data {
            source
                .read_at(extent.offset, extent.length)
                .and_then(|data| device.write_at(extent.offset, &data))
                .map(|()| written += extent.length)
        } else {
            device
                .discard(extent.offset, extent.length)
                .map(|()| discarded += extent.length)
        };
        match result {
            Ok(()) => {
                progress.copied(written, discarded);
                ControlFlow::Continue(())
            }
            Err(err) => {
                failure = Some(SyncError::Copy {
                    offset: extent.offset,
                    length: extent.length,
                    source: err,
                });
                ControlFlow::Break(())
            }
        }
    });

    if let Some(err) = failure {
        return Err(err);
    }
    listed.map_err(|e| SyncError::Discovery {
        what: format!("changed extents of {}", source.name()),
        source: e,
    })?;
    Ok((written, discarded))
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> Result<(), SyncError> {
    let deadline = Instant::now() + delay;
    loop {
        check_cancel(cancel)?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_newest_shared_name() {
        let source = names(&["a", "b", "c", "new"]);
        let dest = names(&["a", "b"]);
        assert_eq!(find_common(&source, &dest, "new").as_deref(), Some("b"));
    }

    #[test]
    fn destination_only_names_are_ignored() {
        let source = names(&["a", "new"]);
        let dest = names(&["z", "y"]);
        assert_eq!(find_common(&source, &dest, "new"), None);
    }

    #[test]
    fn new_snapshot_is_never_common() {
        let source = names(&["new"]);
        let dest = names(&["new"]);
        assert_eq!(find_common(&source, &dest, "new"), None);
    }

    #[test]
    fn summary_matches_report() {
        let report = SyncReport {
            bytes_written: 10,
            bytes_discarded: 4,
            snapshot: "ferry-x".into(),
            ..Default::default()
        };
        assert_eq!(
            report.summary(),
            "Wrote 10 bytes (trimmed 4) and created snapshot 'ferry-x'"
        );
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        assert!(matches!(
            sleep_unless_cancelled(Duration::from_secs(30), &cancel),
            Err(SyncError::Cancelled)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
