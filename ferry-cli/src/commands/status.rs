//! `ferry status`: the daemon's task tree.

use anyhow::{Context, Result};
use clap::Args;
use ferry_daemon::{request_status, DaemonError};
use ferry_task::TaskView;

use super::tree::print_tree;

/// Arguments for `ferry status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        let status = match request_status(&home) {
            Ok(status) => status,
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                return Err(err).context("start it with `ferry daemon start`");
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        let view: TaskView = serde_json::from_value(status["tree"].clone())
            .context("daemon returned a malformed task tree")?;
        if let Some(started) = status["startedAt"].as_str() {
            println!("daemon running since {started}");
        }
        print_tree(&view);
        Ok(())
    }
}
