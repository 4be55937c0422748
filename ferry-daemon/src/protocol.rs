use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
///
/// Commands: `status`, `detail` (needs `task`), `run` (optional `task` job
/// id; the root otherwise), `prepare`, `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            task: None,
        }
    }

    pub fn with_task(cmd: impl Into<String>, task: Option<String>) -> Self {
        Self {
            cmd: cmd.into(),
            task,
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let mut payload = serde_json::to_string(request)?;
    payload.push('\n');
    stream
        .write_all(payload.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    Ok(serde_json::from_str(line.trim_end())?)
}

/// Status tree, retried briefly while the daemon is still binding its socket.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::new("stop"))?;
    response_into_data(response).map(|_| ())
}

/// Start the root, or one job, in the background.
pub fn request_run(home: &Path, job: Option<String>) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::with_task("run", job))?;
    response_into_data(response)
}

pub fn request_prepare(home: &Path) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::new("prepare"))?;
    response_into_data(response)
}

/// Messages and detail reports of the task at `path` (e.g. `vms/vm-1`).
pub fn request_detail(home: &Path, path: &str) -> Result<Value, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest::with_task("detail", Some(path.to_string())),
    )?;
    response_into_data(response)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_missing_task() {
        let json = serde_json::to_string(&DaemonRequest::new("status")).expect("encode");
        assert_eq!(json, r#"{"cmd":"status"}"#);

        let parsed: DaemonRequest =
            serde_json::from_str(r#"{"cmd":"detail","task":"vms/vm-1"}"#).expect("decode");
        assert_eq!(parsed.task.as_deref(), Some("vms/vm-1"));
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = tempfile::tempdir().expect("tempdir");
        let err = send_request(home.path(), &DaemonRequest::new("status"))
            .err()
            .expect("error");
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn error_responses_become_protocol_errors() {
        let err = response_into_data(DaemonResponse::error("nope"))
            .err()
            .expect("error");
        assert_eq!(err.to_string(), "daemon protocol error: nope");
    }
}
