//! Ceph RBD source driven through the `rbd` command-line tool.
//!
//! Snapshots are activated by mapping them read-only with
//! `rbd device map --read-only`; reads go to the mapped device node.

use std::fs::File;
use std::ops::ControlFlow;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use ferry_core::{ClusterConfig, Side, Snapshot};
use serde::Deserialize;

use crate::error::{io_err, StoreError};
use crate::store::command::{run, run_json};
use crate::store::{Extent, SourceConnector, SourcePool, SourceVolume};

/// Connects to pools with the `rbd` binary on `PATH` (or a custom one).
#[derive(Debug, Clone)]
pub struct RbdCli {
    program: String,
}

impl Default for RbdCli {
    fn default() -> Self {
        Self {
            program: "rbd".to_string(),
        }
    }
}

impl RbdCli {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SourceConnector for RbdCli {
    fn connect(
        &self,
        cluster: &ClusterConfig,
        pool: &str,
    ) -> Result<Box<dyn SourcePool>, StoreError> {
        if !cluster.conf_file.exists() {
            return Err(StoreError::NotFound(format!(
                "ceph config {}",
                cluster.conf_file.display()
            )));
        }
        let base = vec![
            "--cluster".to_string(),
            cluster.cluster_name.clone(),
            "--name".to_string(),
            cluster.auth_name.clone(),
            "--conf".to_string(),
            cluster.conf_file.display().to_string(),
        ];
        Ok(Box::new(RbdPool {
            program: self.program.clone(),
            base,
            pool: pool.to_string(),
        }))
    }
}

struct RbdPool {
    program: String,
    base: Vec<String>,
    pool: String,
}

impl RbdPool {
    fn args(&self, rest: &[&str]) -> Vec<String> {
        let mut args = self.base.clone();
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }
}

impl SourcePool for RbdPool {
    fn volume_names(&self) -> Result<Vec<String>, StoreError> {
        let args = self.args(&["ls", "--pool", &self.pool, "--format", "json"]);
        run_json(&self.program, &args)
    }

    fn open_volume(&self, name: &str) -> Result<Box<dyn SourceVolume>, StoreError> {
        Ok(Box::new(RbdVolume {
            program: self.program.clone(),
            base: self.base.clone(),
            spec: format!("{}/{}", self.pool, name),
            name: name.to_string(),
            active: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

struct Mapped {
    snapshot: String,
    device: PathBuf,
    file: File,
}

struct RbdVolume {
    program: String,
    base: Vec<String>,
    /// `pool/image`
    spec: String,
    name: String,
    active: Option<Mapped>,
}

#[derive(Deserialize)]
struct ImageInfo {
    size: u64,
}

#[derive(Deserialize)]
struct SnapEntry {
    id: u64,
    name: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Exists {
    Bool(bool),
    Text(String),
}

impl Exists {
    fn as_bool(&self) -> bool {
        match self {
            Exists::Bool(b) => *b,
            Exists::Text(s) => s == "true",
        }
    }
}

#[derive(Deserialize)]
struct DiffEntry {
    offset: u64,
    length: u64,
    exists: Exists,
}

/// `rbd snap ls` prints ctime-style local timestamps.
pub(crate) fn parse_rbd_timestamp(text: &str) -> Option<chrono::DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), "%a %b %e %H:%M:%S %Y").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

impl RbdVolume {
    fn args(&self, rest: &[&str]) -> Vec<String> {
        let mut args = self.base.clone();
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }

    fn snap_entries(&self) -> Result<Vec<SnapEntry>, StoreError> {
        let args = self.args(&["snap", "ls", "--format", "json", &self.spec]);
        let mut entries: Vec<SnapEntry> = run_json(&self.program, &args)?;
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    fn unmap(&mut self) -> Result<(), StoreError> {
        if let Some(mapped) = self.active.take() {
            drop(mapped.file);
            let device = mapped.device.display().to_string();
            run(&self.program, &self.args(&["device", "unmap", &device]))?;
        }
        Ok(())
    }
}

impl SourceVolume for RbdVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Result<u64, StoreError> {
        let args = self.args(&["info", "--format", "json", &self.spec]);
        let info: ImageInfo = run_json(&self.program, &args)?;
        Ok(info.size)
    }

    fn snapshot_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.snap_entries()?.into_iter().map(|e| e.name).collect())
    }

    fn snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        self.snap_entries()?
            .into_iter()
            .map(|e| {
                let ts = e
                    .timestamp
                    .as_deref()
                    .and_then(parse_rbd_timestamp)
                    .ok_or_else(|| StoreError::Parse {
                        what: "rbd snap ls".to_string(),
                        reason: format!("snapshot {} has no readable timestamp", e.name),
                    })?;
                Ok(Snapshot::new(e.name, ts, Side::Source))
            })
            .collect()
    }

    fn create_and_activate_snapshot(&mut self, name: &str) -> Result<(), StoreError> {
        let snap_spec = format!("{}@{}", self.spec, name);
        run(&self.program, &self.args(&["snap", "create", &snap_spec]))?;

        self.unmap()?;
        let device = run(
            &self.program,
            &self.args(&["device", "map", "--read-only", &snap_spec]),
        )?;
        let device = PathBuf::from(device);
        let file = File::open(&device).map_err(|e| io_err(&device, e))?;
        self.active = Some(Mapped {
            snapshot: name.to_string(),
            device,
            file,
        });
        Ok(())
    }

    fn diff_extents(
        &self,
        from: Option<&str>,
        visit: &mut dyn FnMut(Extent) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| StoreError::NotFound(format!("active snapshot of {}", self.spec)))?;
        let snap_spec = format!("{}@{}", self.spec, active.snapshot);
        let mut rest = vec!["diff", "--format", "json"];
        if let Some(from) = from {
            rest.extend(["--from-snap", from]);
        }
        rest.push(&snap_spec);

        let entries: Vec<DiffEntry> = run_json(&self.program, &self.args(&rest))?;
        for entry in entries {
            let extent = Extent {
                offset: entry.offset,
                length: entry.length,
                has_data: entry.exists.as_bool(),
            };
            if visit(extent).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>, StoreError> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| StoreError::NotFound(format!("active snapshot of {}", self.spec)))?;
        let len = usize::try_from(length).map_err(|_| StoreError::OutOfRange {
            volume: self.spec.clone(),
            offset,
            length,
            size: usize::MAX as u64,
        })?;
        let mut buf = vec![0u8; len];
        active
            .file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| io_err(&active.device, e))?;
        Ok(buf)
    }

    fn delete_snapshot(&mut self, name: &str) -> Result<(), StoreError> {
        if self.active.as_ref().is_some_and(|m| m.snapshot == name) {
            self.unmap()?;
        }
        let snap_spec = format!("{}@{}", self.spec, name);
        run(&self.program, &self.args(&["snap", "rm", &snap_spec]))?;
        Ok(())
    }
}

impl Drop for RbdVolume {
    fn drop(&mut self) {
        if let Err(err) = self.unmap() {
            tracing::warn!(volume = %self.spec, error = %err, "failed to unmap snapshot device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_ctime_timestamps() {
        let ts = parse_rbd_timestamp("Tue Jan  2 03:04:05 2024").expect("parse");
        assert_eq!(ts.second(), 5);
        assert!(parse_rbd_timestamp("yesterday").is_none());
    }

    #[test]
    fn diff_entries_accept_both_exists_forms() {
        let text = r#"[{"offset":0,"length":4096,"exists":"true"},
                       {"offset":4096,"length":4096,"exists":false}]"#;
        let entries: Vec<DiffEntry> = serde_json::from_str(text).expect("json");
        assert!(entries[0].exists.as_bool());
        assert!(!entries[1].exists.as_bool());
    }

    #[test]
    fn missing_conf_file_is_not_found() {
        let cluster = ClusterConfig {
            auth_name: "client.admin".into(),
            conf_file: PathBuf::from("/nonexistent/ceph.conf"),
            cluster_name: "ceph".into(),
        };
        let err = RbdCli::default().connect(&cluster, "rbd").err().expect("error");
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
