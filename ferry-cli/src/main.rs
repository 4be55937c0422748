//! Ferry: incremental block-volume backups from Ceph RBD to ZFS.
//!
//! # Usage
//!
//! ```text
//! ferry run [--config <path>] [--job <id>] [--json]
//! ferry check-config [--config <path>]
//! ferry status [--json]
//! ferry daemon start|stop|status|prepare
//! ferry daemon trigger [--job <id>]
//! ferry daemon detail <job/volume>
//! ```
//!
//! `--config` defaults to `~/.ferry/ferry.yaml`.

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckConfigArgs, daemon::DaemonCommand, run::RunArgs, status::StatusArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ferry",
    version,
    about = "Incremental snapshot-based replication of block volumes",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up every job (or one job) once and exit.
    Run(RunArgs),

    /// Validate a configuration file without touching any storage.
    CheckConfig(CheckConfigArgs),

    /// Show the task tree of the running daemon.
    Status(StatusArgs),

    /// Run and control the background service.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::CheckConfig(args) => args.run().map(|()| ExitCode::SUCCESS),
        Commands::Status(args) => args.run().map(|()| ExitCode::SUCCESS),
        Commands::Daemon { command } => commands::daemon::run(command).map(|()| ExitCode::SUCCESS),
    }
}
