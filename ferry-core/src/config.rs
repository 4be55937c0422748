//! YAML configuration model.
//!
//! # File layout
//!
//! ```yaml
//! clusters:
//!   main:
//!     confFile: /etc/ceph/ceph.conf
//! jobs:
//!   - id: vms
//!     cluster: main
//!     sourcePool: rbd
//!     destination: tank/backups
//! ```
//!
//! This module only describes the document and loads it. Validation,
//! regex compilation and rule construction happen in the job builder, which
//! receives a [`ConfigDefaults`] value instead of reading global defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

// ---------------------------------------------------------------------------
// 1. Defaults
// ---------------------------------------------------------------------------

/// Immutable defaults applied while building a processed configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDefaults {
    pub cluster: ClusterConfig,
    pub max_concurrency: usize,
    pub snapshot_prefix: String,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig {
                auth_name: "client.admin".to_string(),
                conf_file: PathBuf::from("/etc/ceph/ceph.conf"),
                cluster_name: "ceph".to_string(),
            },
            max_concurrency: 2,
            snapshot_prefix: "ferry".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Document model
// ---------------------------------------------------------------------------

/// Root of the YAML document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    #[serde(default)]
    pub clusters: BTreeMap<String, RawClusterConfig>,
    #[serde(default)]
    pub jobs: Vec<RawJobConfig>,
}

/// Connection settings for a source cluster; every field may be defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawClusterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
}

impl RawClusterConfig {
    /// Fill unset fields from `defaults`.
    pub fn resolve(&self, defaults: &ConfigDefaults) -> ClusterConfig {
        ClusterConfig {
            auth_name: non_empty(&self.auth_name)
                .unwrap_or_else(|| defaults.cluster.auth_name.clone()),
            conf_file: self
                .conf_file
                .clone()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| defaults.cluster.conf_file.clone()),
            cluster_name: non_empty(&self.cluster_name)
                .unwrap_or_else(|| defaults.cluster.cluster_name.clone()),
        }
    }
}

/// Fully resolved cluster connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub auth_name: String,
    pub conf_file: PathBuf,
    pub cluster_name: String,
}

/// One replication job as written in the YAML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawJobConfig {
    #[serde(default)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub source_pool: String,
    #[serde(default)]
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_prefix: Option<String>,
    /// Cron expression; five fields (minute resolution) or six/seven (with seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruning: Option<RawPruningConfig>,
}

/// Per-side keep rules. An absent list keeps everything on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawPruningConfig {
    #[serde(default)]
    pub keep_source: Vec<KeepRuleConfig>,
    #[serde(default)]
    pub keep_destination: Vec<KeepRuleConfig>,
}

/// A single keep rule, discriminated by its `type` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KeepRuleConfig {
    /// Keep the newest `count` snapshots whose names match `regex`.
    #[serde(rename = "lastN")]
    LastN {
        count: i64,
        #[serde(default)]
        regex: String,
    },
    /// Keep snapshots whose names match (or, negated, do not match) `regex`.
    #[serde(rename = "regex")]
    Regex {
        regex: String,
        #[serde(default)]
        negate: bool,
    },
    /// Fit matching snapshots into a retention grid such as `1x1h(keep=all) | 24x1h`.
    #[serde(rename = "grid")]
    Grid { regex: String, grid: String },
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load the configuration document at `path`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<RawConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse_str(&contents, path)
}

/// Parse a configuration document; `origin` is only used in error messages.
pub fn parse_str(contents: &str, origin: &Path) -> Result<RawConfig, ConfigError> {
    serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: origin.to_path_buf(),
        source: e,
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
clusters:
  main: {}
  backup:
    authName: client.backups
    confFile: /etc/ceph/ceph2.conf
    clusterName: ceph2
jobs:
  - id: vms
    label: VM disks
    cluster: main
    sourcePool: rbd
    destination: tank/backups
    include: '^vm-\d+-disk-'
    maxConcurrency: 3
    schedule: '0 3 * * *'
    pruning:
      keepSource:
        - { type: lastN, count: 5 }
      keepDestination:
        - { type: grid, regex: '^ferry-', grid: '1x1h(keep=all) | 24x1h' }
        - { type: regex, regex: '^manual-', negate: true }
"#;

    #[test]
    fn parses_sample_document() {
        let cfg = parse_str(SAMPLE, Path::new("sample.yaml")).expect("parse");
        assert_eq!(cfg.clusters.len(), 2);
        assert_eq!(cfg.jobs.len(), 1);
        let job = &cfg.jobs[0];
        assert_eq!(job.id, "vms");
        assert_eq!(job.source_pool, "rbd");
        assert_eq!(job.max_concurrency, Some(3));
        let pruning = job.pruning.as_ref().expect("pruning");
        assert_eq!(
            pruning.keep_source,
            vec![KeepRuleConfig::LastN {
                count: 5,
                regex: String::new()
            }]
        );
        assert!(matches!(
            pruning.keep_destination[1],
            KeepRuleConfig::Regex { negate: true, .. }
        ));
    }

    #[test]
    fn cluster_defaults_fill_missing_fields() {
        let cfg = parse_str(SAMPLE, Path::new("sample.yaml")).expect("parse");
        let defaults = ConfigDefaults::default();
        let main = cfg.clusters["main"].resolve(&defaults);
        assert_eq!(main, defaults.cluster);
        let backup = cfg.clusters["backup"].resolve(&defaults);
        assert_eq!(backup.auth_name, "client.backups");
        assert_eq!(backup.cluster_name, "ceph2");
    }

    #[test]
    fn unknown_rule_type_is_a_parse_error() {
        let doc = "jobs:\n  - id: a\n    pruning:\n      keepSource:\n        - { type: newest }\n";
        let err = parse_str(doc, Path::new("bad.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    }

    #[test]
    fn load_missing_file_returns_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let err = load_at(&dir.path().join("ferry.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
        assert!(err.to_string().contains("ferry.yaml"));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("ferry.yaml");
        std::fs::write(&path, SAMPLE).expect("write");
        let cfg = load_at(&path).expect("load");
        assert_eq!(cfg.jobs[0].label.as_deref(), Some("VM disks"));
    }
}
