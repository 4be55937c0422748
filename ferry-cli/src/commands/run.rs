//! `ferry run`: one-shot backup of the root or a single job.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use ferry_backup::{BackupTree, Backends};

use super::{config_path, load_config, tree::print_tree};

/// Arguments for `ferry run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file (default `~/.ferry/ferry.yaml`).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run only this job.
    #[arg(long)]
    pub job: Option<String>,

    /// Emit the final status tree as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Exits with failure when the final status of the target is bad.
    pub fn run(self) -> Result<ExitCode> {
        ferry_daemon::init_tracing();

        let path = config_path(self.config)?;
        let config = load_config(&path)?;
        if let Some(job) = self.job.as_deref() {
            if config.job(job).is_none() {
                bail!("unknown job '{job}' in {}", path.display());
            }
        }

        let tree = BackupTree::new(&config, Backends::system());
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        // The outcome is read back from the status tree below.
        let _ = runtime.block_on(tree.trigger(self.job.as_deref()));

        let view = match self.job.as_deref() {
            Some(job) => tree
                .node()
                .find(job)
                .map(|node| node.view())
                .context("job vanished from the task tree")?,
            None => tree.view(),
        };
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&view).context("failed to serialize status JSON")?
            );
        } else {
            print_tree(&view);
        }

        if tree.is_bad(self.job.as_deref()) {
            eprintln!("{}", "backup finished with failures".red());
            Ok(ExitCode::FAILURE)
        } else {
            Ok(ExitCode::SUCCESS)
        }
    }
}
