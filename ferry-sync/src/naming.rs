//! Snapshot naming.
//!
//! Names sort chronologically: `<prefix>-YYYY-MM-DD-HH:MM:SS` in UTC. Two
//! cycles in the same second get `-1`, `-2`, … appended.

use chrono::{DateTime, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

pub fn snapshot_name(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}-{}", at.format(TIMESTAMP_FORMAT))
}

/// [`snapshot_name`], suffixed until it differs from every name in `taken`.
pub fn unique_snapshot_name(prefix: &str, at: DateTime<Utc>, taken: &[String]) -> String {
    let base = snapshot_name(prefix, at);
    if !taken.contains(&base) {
        return base;
    }
    let free = (1u32..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken.contains(candidate));
    free.unwrap_or(base)
}
