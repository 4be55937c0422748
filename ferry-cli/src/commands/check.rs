//! `ferry check-config`: load and validate without touching storage.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use ferry_backup::JobConfig;
use ferry_core::Side;
use tabled::{settings::Style, Table, Tabled};

use super::{config_path, load_config};

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Configuration file (default `~/.ferry/ferry.yaml`).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "job")]
    id: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "destination")]
    destination: String,
    #[tabled(rename = "concurrency")]
    concurrency: usize,
    #[tabled(rename = "next run")]
    next_run: String,
    #[tabled(rename = "keep rules (src/dst)")]
    rules: String,
}

impl From<&JobConfig> for JobRow {
    fn from(job: &JobConfig) -> Self {
        Self {
            id: job.id.0.clone(),
            source: format!("{}/{}", job.cluster.cluster_name, job.source_pool),
            destination: job.destination.clone(),
            concurrency: job.max_concurrency,
            next_run: job
                .schedule
                .as_ref()
                .and_then(|s| s.upcoming(Utc).next())
                .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "manual".to_string()),
            rules: format!(
                "{}/{}",
                job.retention.rules(Side::Source).len(),
                job.retention.rules(Side::Destination).len()
            ),
        }
    }
}

impl CheckConfigArgs {
    pub fn run(self) -> Result<()> {
        let path = config_path(self.config)?;
        let config = load_config(&path)?;

        let rows: Vec<JobRow> = config.jobs.iter().map(|j| JobRow::from(j.as_ref())).collect();
        if !rows.is_empty() {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        println!(
            "{} {} ({} jobs)",
            "configuration OK:".green().bold(),
            path.display(),
            config.jobs.len()
        );
        Ok(())
    }
}
