//! Applying a [`RetentionPolicy`] to both ends of a volume pairing.

use ferry_core::Side;
use ferry_prune::RetentionPolicy;
use serde::Serialize;

use crate::error::SyncError;
use crate::progress::Progress;
use crate::store::{DestinationVolume, SourceVolume};

/// Snapshots destroyed by one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub source_destroyed: Vec<String>,
    pub destination_destroyed: Vec<String>,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.source_destroyed.len() + self.destination_destroyed.len()
    }
}

/// Re-list both sides and destroy what `policy` nominates.
///
/// Runs after the cycle's snapshots exist, so the newest one on each side
/// is visible to count-based rules.
pub fn apply_retention(
    policy: &RetentionPolicy,
    source: &mut dyn SourceVolume,
    destination: &mut dyn DestinationVolume,
    progress: &dyn Progress,
) -> Result<PruneReport, SyncError> {
    let mut report = PruneReport::default();
    if policy.is_noop() {
        return Ok(report);
    }

    let snaps = source.snapshots().map_err(|e| SyncError::Discovery {
        what: format!("snapshots of {}", source.name()),
        source: e,
    })?;
    let doomed: Vec<String> = policy
        .destroy(Side::Source, &snaps)
        .into_iter()
        .map(|s| s.name.clone())
        .collect();
    if !doomed.is_empty() {
        progress.log(&format!("Pruning {} source snapshots", doomed.len()));
    }
    for name in doomed {
        tracing::info!(volume = %source.name(), snapshot = %name, "destroying source snapshot");
        source
            .delete_snapshot(&name)
            .map_err(|e| SyncError::Snapshot {
                name: format!("{}@{name}", source.name()),
                source: e,
            })?;
        report.source_destroyed.push(name);
    }

    let snaps = destination.snapshots().map_err(|e| SyncError::Discovery {
        what: format!("snapshots of {}", destination.name()),
        source: e,
    })?;
    let doomed: Vec<String> = policy
        .destroy(Side::Destination, &snaps)
        .into_iter()
        .map(|s| s.name.clone())
        .collect();
    if !doomed.is_empty() {
        progress.log(&format!("Pruning {} destination snapshots", doomed.len()));
    }
    for name in doomed {
        tracing::info!(volume = %destination.name(), snapshot = %name, "destroying destination snapshot");
        destination
            .delete_snapshot(&name)
            .map_err(|e| SyncError::Snapshot {
                name: format!("{}@{name}", destination.name()),
                source: e,
            })?;
        report.destination_destroyed.push(name);
    }

    Ok(report)
}
