//! `ferry daemon`: background service lifecycle and control.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;

use ferry_backup::Backends;
use ferry_daemon::paths::socket_path;
use ferry_daemon::{
    request_detail, request_prepare, request_run, request_status, request_stop, start_blocking,
    DaemonError,
};

use super::{config_path, load_config};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (scheduler + socket server).
    Start(DaemonStartArgs),
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon status over the Unix socket.
    Status,
    /// Re-enumerate volumes of every job.
    Prepare,
    /// Start a run of every job, or of one job.
    Trigger(DaemonTriggerArgs),
    /// Print the message log and detail reports of one task.
    Detail(DaemonDetailArgs),
}

#[derive(Args, Debug)]
pub struct DaemonStartArgs {
    /// Configuration file (default `~/.ferry/ferry.yaml`).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DaemonTriggerArgs {
    #[arg(long)]
    pub job: Option<String>,
}

#[derive(Args, Debug)]
pub struct DaemonDetailArgs {
    /// Task path, e.g. `vms/vm-100-disk-0`.
    pub task: String,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        DaemonCommand::Start(args) => {
            let path = config_path(args.config)?;
            let config = load_config(&path)?;
            start_blocking(&home, &config, Backends::system())
                .context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Prepare => {
            request_prepare(&home).context("prepare failed")?;
            println!("volumes re-enumerated");
        }
        DaemonCommand::Trigger(args) => {
            let started = request_run(&home, args.job).context("failed to start run")?;
            println!(
                "started {}",
                started["started"].as_str().unwrap_or("run")
            );
        }
        DaemonCommand::Detail(args) => {
            let detail = request_detail(&home, &args.task)
                .with_context(|| format!("failed to fetch detail for '{}'", args.task))?;
            print_detail(&detail)?;
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}

fn print_detail(detail: &Value) -> Result<()> {
    println!(
        "{} [{}] {}",
        detail["task"].as_str().unwrap_or_default(),
        detail["status"]["label"].as_str().unwrap_or_default(),
        detail["status"]["message"].as_str().unwrap_or_default(),
    );
    for line in detail["messages"].as_array().into_iter().flatten() {
        println!(
            "  {}  {}",
            line["at"].as_str().unwrap_or_default(),
            line["message"].as_str().unwrap_or_default()
        );
    }
    if detail["detail"].as_object().is_some_and(|d| !d.is_empty()) {
        print_json(&detail["detail"])?;
    }
    Ok(())
}
