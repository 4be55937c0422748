use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_backup::{BackupConfig, BackupTree, Backends, JobConfig};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::error::{io_err, DaemonError};
use crate::paths::{ferry_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Build the task tree and block the current thread until the daemon exits.
pub fn start_blocking(
    home: &Path,
    config: &BackupConfig,
    backends: Backends,
) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let tree = Arc::new(BackupTree::new(config, backends));
    let schedules = config.jobs.clone();
    runtime.block_on(run(home.to_path_buf(), tree, schedules))
}

/// Run the daemon: one scheduler per scheduled job, the socket server and
/// the ctrl-c handler. Returns once any of them asks for shutdown.
pub async fn run(
    home: PathBuf,
    tree: Arc<BackupTree>,
    jobs: Vec<Arc<JobConfig>>,
) -> Result<(), DaemonError> {
    let root = ferry_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    let started_at = Utc::now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    {
        let tree = Arc::clone(&tree);
        tokio::spawn(async move {
            if let Err(err) = tree.root().prepare().await {
                tracing::warn!(error = %err, "initial prepare failed");
            }
        });
    }

    let mut schedulers = Vec::new();
    for job in jobs.into_iter().filter(|j| j.schedule.is_some()) {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let tree = Arc::clone(&tree);
        let name = format!("scheduler:{}", job.id);
        let handle = tokio::spawn(async move {
            let result = scheduler_task(tree, job, shutdown_rx).await;
            if result.is_err() {
                let _ = shutdown.send(());
            }
            result
        });
        schedulers.push((name, handle));
    }

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let tree = Arc::clone(&tree);
        tokio::spawn(async move {
            let result =
                socket_server_task(home, tree, shutdown.clone(), shutdown_rx, started_at).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    tree.shutdown();
    for (name, handle) in schedulers {
        handle_join(&name, handle.await)?;
    }
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fire `job` at every upcoming time of its schedule. A firing that finds the
/// job busy is logged and dropped, not queued.
async fn scheduler_task(
    tree: Arc<BackupTree>,
    job: Arc<JobConfig>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(schedule) = job.schedule.clone() else {
        return Ok(());
    };
    let id = job.id.0.clone();

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            tracing::info!(job = %id, "schedule has no further fire times");
            return Ok(());
        };
        tracing::debug!(job = %id, next = %next, "next scheduled run");
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(wait) => fire(&tree, &id),
        }
    }
    Ok(())
}

fn fire(tree: &Arc<BackupTree>, id: &str) {
    let tree = Arc::clone(tree);
    let id = id.to_string();
    tokio::spawn(async move {
        match tree.trigger(Some(&id)).await {
            Ok(()) => tracing::info!(job = %id, "scheduled run finished"),
            Err(err) if err.is_conflict() => {
                tracing::info!(job = %id, "scheduled run skipped, job is still active")
            }
            Err(err) => tracing::warn!(job = %id, error = %err, "scheduled run failed"),
        }
    });
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    tree: Arc<BackupTree>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let tree = Arc::clone(&tree);
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, tree, shutdown_tx, started_at).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    tree: Arc<BackupTree>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = handle_request(&tree, &request, &shutdown_tx, started_at).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// Answer one request against the live task tree.
pub(crate) async fn handle_request(
    tree: &Arc<BackupTree>,
    request: &DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
    started_at: DateTime<Utc>,
) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(json!({
            "serverTime": Utc::now(),
            "startedAt": started_at,
            "tree": tree.view(),
        })),
        "detail" => {
            let Some(path) = request.task.as_deref() else {
                return DaemonResponse::error("detail needs a task path");
            };
            match tree.node().find(path) {
                Some(node) => DaemonResponse::ok(json!({
                    "task": node.path(),
                    "status": node.view().status,
                    "messages": node.messages(),
                    "detail": node.detail(),
                })),
                None => DaemonResponse::error(format!("unknown task '{path}'")),
            }
        }
        "run" => start_run(tree, request.task.clone()),
        "prepare" => match tree.root().prepare().await {
            Ok(()) => DaemonResponse::ok(json!({ "prepared": true })),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        "stop" => {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

/// Validate the target, then run it in the background.
fn start_run(tree: &Arc<BackupTree>, job: Option<String>) -> DaemonResponse {
    let node = match job.as_deref() {
        None => Arc::clone(tree.node()),
        Some(id) => match tree.job(id) {
            Some(task) => Arc::clone(task.node()),
            None => return DaemonResponse::error(format!("unknown job '{id}'")),
        },
    };
    if !node.kind().is_idle() {
        return DaemonResponse::error(format!("{} is already in progress", node.path()));
    }

    let tree = Arc::clone(tree);
    let target = job.clone();
    tokio::spawn(async move {
        if let Err(err) = tree.trigger(target.as_deref()).await {
            tracing::warn!(error = %err, "requested run ended with errors");
        }
    });
    DaemonResponse::ok(json!({ "started": node.path() }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the `RUST_LOG`-driven subscriber (default `info`). Safe to call
/// more than once.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{ConfigDefaults, StatusKind};
    use ferry_sync::store::memory::{MemoryDestination, MemorySource, PAGE};
    use std::time::Duration;

    fn memory_tree() -> (Arc<BackupTree>, BackupConfig) {
        let source = MemorySource::new();
        source.add_pool("rbd");
        source.add_volume("rbd", "vm-1", 8 * PAGE);
        source.write("rbd", "vm-1", 0, b"boot sector");
        let job = JobConfig::new("vms", "rbd", "tank/backups", &ConfigDefaults::default());
        let config = BackupConfig {
            jobs: vec![Arc::new(job)],
        };
        let backends = Backends::memory(source, MemoryDestination::new());
        (Arc::new(BackupTree::new(&config, backends)), config)
    }

    async fn ask(tree: &Arc<BackupTree>, cmd: &str, task: Option<&str>) -> DaemonResponse {
        let (shutdown_tx, _) = broadcast::channel(1);
        let request = DaemonRequest::with_task(cmd, task.map(str::to_string));
        handle_request(tree, &request, &shutdown_tx, Utc::now()).await
    }

    async fn wait_until_finished(tree: &Arc<BackupTree>) {
        for _ in 0..200 {
            if tree.node().kind().is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("root never finished");
    }

    #[tokio::test]
    async fn status_returns_the_tree() {
        let (tree, _) = memory_tree();
        let response = ask(&tree, "status", None).await;
        assert!(response.ok);
        let data = response.data.expect("data");
        assert_eq!(data["tree"]["id"], "root");
        assert_eq!(data["tree"]["children"][0]["id"], "vms");
    }

    #[tokio::test]
    async fn run_then_detail_reports_the_volume() {
        let (tree, _) = memory_tree();
        let response = ask(&tree, "run", None).await;
        assert!(response.ok, "{:?}", response.error);
        wait_until_finished(&tree).await;
        assert_eq!(tree.node().kind(), StatusKind::Success);

        let response = ask(&tree, "detail", Some("vms/vm-1")).await;
        let data = response.data.expect("data");
        assert_eq!(data["task"], "root/vms/vm-1");
        assert!(data["detail"]["reconciliation"]["plan"]
            .as_str()
            .is_some_and(|p| p.starts_with("(base) -> ferry-")));
        assert!(data["messages"].as_array().is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test]
    async fn run_rejects_unknown_job_and_detail_unknown_path() {
        let (tree, _) = memory_tree();
        let response = ask(&tree, "run", Some("nope")).await;
        assert_eq!(response.error.as_deref(), Some("unknown job 'nope'"));

        let response = ask(&tree, "detail", Some("vms/ghost")).await;
        assert_eq!(response.error.as_deref(), Some("unknown task 'vms/ghost'"));

        let response = ask(&tree, "reboot", None).await;
        assert_eq!(response.error.as_deref(), Some("unknown command 'reboot'"));
    }

    #[tokio::test]
    async fn stop_broadcasts_shutdown() {
        let (tree, _) = memory_tree();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let response =
            handle_request(&tree, &DaemonRequest::new("stop"), &shutdown_tx, Utc::now()).await;
        assert!(response.ok);
        shutdown_rx.recv().await.expect("shutdown signal");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn socket_round_trip_status_and_stop() {
        let home = tempfile::tempdir().expect("tempdir");
        let (tree, config) = memory_tree();
        let daemon = tokio::spawn(run(home.path().to_path_buf(), tree, config.jobs.clone()));

        let home_path = home.path().to_path_buf();
        let status = tokio::task::spawn_blocking(move || {
            for _ in 0..50 {
                if let Ok(status) = crate::protocol::request_status(&home_path) {
                    crate::protocol::request_stop(&home_path).expect("stop");
                    return status;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            panic!("daemon never answered");
        })
        .await
        .expect("client thread");

        assert_eq!(status["tree"]["label"], "All jobs");
        daemon.await.expect("join").expect("daemon result");
        assert!(!socket_path(home.path()).exists());
    }
}
