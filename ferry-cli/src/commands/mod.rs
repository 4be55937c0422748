pub mod check;
pub mod daemon;
pub mod run;
pub mod status;
pub mod tree;

use std::path::PathBuf;

use anyhow::{Context, Result};
use ferry_backup::BackupConfig;
use ferry_core::ConfigDefaults;

/// `--config`, or `~/.ferry/ferry.yaml` when absent.
pub fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => {
            let home = dirs::home_dir().context("could not determine home directory")?;
            Ok(ferry_daemon::paths::config_path(&home))
        }
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &std::path::Path) -> Result<BackupConfig> {
    ferry_backup::load(path, &ConfigDefaults::default())
        .with_context(|| format!("invalid configuration in {}", path.display()))
}
