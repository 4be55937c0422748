//! Domain types shared by every ferry crate.
//!
//! Snapshots on the two sides of a replication pair are correlated by name
//! only; [`Snapshot`] carries a [`Side`] tag so that mixed collections can be
//! told apart without generic parameters.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a configured replication job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The name of a source volume; also names its destination counterpart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VolumeName(pub String);

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for VolumeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for VolumeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Which store a snapshot was listed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Destination => write!(f, "destination"),
        }
    }
}

/// A named, immutable point-in-time marker on a volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>, side: Side) -> Self {
        Self {
            name: name.into(),
            timestamp,
            side,
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.side, self.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(JobId::from("vms").to_string(), "vms");
        assert_eq!(VolumeName::from("vm-100-disk-0").to_string(), "vm-100-disk-0");
    }

    #[test]
    fn newtype_equality() {
        let a = VolumeName::from("x");
        let b = VolumeName::from(String::from("x"));
        assert_eq!(a, b);
    }

    #[test]
    fn snapshot_display_carries_side() {
        let snap = Snapshot::new("ferry-2024-01-01-00:00:00", Utc::now(), Side::Destination);
        assert_eq!(snap.to_string(), "destination@ferry-2024-01-01-00:00:00");
    }

    #[test]
    fn side_serializes_lowercase() {
        let yaml = serde_yaml::to_string(&Side::Source).expect("serialize");
        assert_eq!(yaml.trim(), "source");
    }
}
