//! ZFS zvol destination driven through the `zfs` command-line tool.

use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use ferry_core::{Side, Snapshot};

use crate::error::StoreError;
use crate::store::command::{args, run};
use crate::store::{DestinationStore, DestinationVolume};

/// Volume sizes are rounded up to a multiple of this.
pub const VOLSIZE_GRANULARITY: u64 = 128 * 1024;

/// Round `size` up to a whole, non-zero number of granules.
pub fn round_volsize(size: u64) -> u64 {
    size.div_ceil(VOLSIZE_GRANULARITY).max(1) * VOLSIZE_GRANULARITY
}

/// Creates sparse zvols beneath a base dataset.
#[derive(Debug, Clone)]
pub struct ZfsCli {
    program: String,
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self {
            program: "zfs".to_string(),
        }
    }
}

impl ZfsCli {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn volsize(&self, dataset: &str) -> Result<Option<u64>, StoreError> {
        match run(&self.program, &args(["get", "-H", "-p", "-o", "value", "volsize", dataset])) {
            Ok(out) => out.parse().map(Some).map_err(|_| StoreError::Parse {
                what: "zfs get volsize".to_string(),
                reason: format!("'{out}' is not a size"),
            }),
            Err(StoreError::Command { stderr, .. }) if stderr.contains("does not exist") => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl DestinationStore for ZfsCli {
    fn open_or_create_volume(
        &self,
        base: &str,
        name: &str,
        min_size: u64,
    ) -> Result<Box<dyn DestinationVolume>, StoreError> {
        let dataset = format!("{base}/{name}");
        let wanted = round_volsize(min_size).to_string();
        match self.volsize(&dataset)? {
            None => {
                tracing::info!(dataset = %dataset, size = min_size, "creating zvol");
                run(
                    &self.program,
                    &args(["create", "-p", "-s", "-V", wanted.as_str(), dataset.as_str()]),
                )?;
            }
            Some(current) if current < min_size => {
                tracing::info!(dataset = %dataset, from = current, to = min_size, "growing zvol");
                let prop = format!("volsize={wanted}");
                run(&self.program, &args(["set", prop.as_str(), dataset.as_str()]))?;
            }
            Some(_) => {}
        }
        Ok(Box::new(Zvol {
            program: self.program.clone(),
            dataset,
        }))
    }
}

struct Zvol {
    program: String,
    dataset: String,
}

/// Parse `zfs list -H -p -o name,creation` output into snapshots.
pub(crate) fn parse_snapshot_list(dataset: &str, output: &str) -> Result<Vec<Snapshot>, StoreError> {
    let parse_err = |reason: String| StoreError::Parse {
        what: "zfs list -t snapshot".to_string(),
        reason,
    };
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (full, creation) = line
                .split_once('\t')
                .ok_or_else(|| parse_err(format!("malformed line '{line}'")))?;
            let name = full
                .strip_prefix(dataset)
                .and_then(|rest| rest.strip_prefix('@'))
                .ok_or_else(|| parse_err(format!("'{full}' is not a snapshot of {dataset}")))?;
            let secs: i64 = creation
                .trim()
                .parse()
                .map_err(|_| parse_err(format!("bad creation time '{creation}'")))?;
            let ts = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| parse_err(format!("creation time {secs} out of range")))?;
            Ok(Snapshot::new(name, ts, Side::Destination))
        })
        .collect()
}

impl DestinationVolume for Zvol {
    fn name(&self) -> &str {
        &self.dataset
    }

    fn snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        let out = run(
            &self.program,
            &args([
                "list", "-H", "-p", "-t", "snapshot", "-o", "name,creation", "-s", "creation",
                "-d", "1", self.dataset.as_str(),
            ]),
        )?;
        parse_snapshot_list(&self.dataset, &out)
    }

    fn rollback_to(&mut self, snapshot: &str) -> Result<(), StoreError> {
        let target = format!("{}@{}", self.dataset, snapshot);
        run(&self.program, &args(["rollback", "-r", target.as_str()]))?;
        Ok(())
    }

    fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/zvol/{}", self.dataset))
    }

    fn create_snapshot(&mut self, name: &str) -> Result<(), StoreError> {
        let target = format!("{}@{}", self.dataset, name);
        run(&self.program, &args(["snapshot", target.as_str()]))?;
        Ok(())
    }

    fn delete_snapshot(&mut self, name: &str) -> Result<(), StoreError> {
        let target = format!("{}@{}", self.dataset, name);
        run(&self.program, &args(["destroy", target.as_str()]))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volsize_rounds_up_to_granule() {
        assert_eq!(round_volsize(0), VOLSIZE_GRANULARITY);
        assert_eq!(round_volsize(1), VOLSIZE_GRANULARITY);
        assert_eq!(round_volsize(VOLSIZE_GRANULARITY), VOLSIZE_GRANULARITY);
        assert_eq!(round_volsize(VOLSIZE_GRANULARITY + 1), 2 * VOLSIZE_GRANULARITY);
        assert_eq!(round_volsize(10 << 30), 10 << 30);
    }

    #[test]
    fn parses_snapshot_listing() {
        let out = "tank/b/vm-1@ferry-2024-01-01-00:00:00\t1704067200\n\
                   tank/b/vm-1@manual\t1704070800\n";
        let snaps = parse_snapshot_list("tank/b/vm-1", out).expect("parse");
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].name, "ferry-2024-01-01-00:00:00");
        assert_eq!(snaps[0].timestamp.timestamp(), 1_704_067_200);
        assert_eq!(snaps[1].side, Side::Destination);
    }

    #[test]
    fn rejects_foreign_snapshots() {
        let out = "tank/b/other@x\t1704067200\n";
        assert!(parse_snapshot_list("tank/b/vm-1", out).is_err());
    }

    #[test]
    fn device_path_is_under_dev_zvol() {
        let vol = Zvol {
            program: "zfs".into(),
            dataset: "tank/b/vm-1".into(),
        };
        assert_eq!(vol.device_path(), PathBuf::from("/dev/zvol/tank/b/vm-1"));
    }
}
