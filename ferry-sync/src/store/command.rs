//! Running storage CLI tools.

use std::process::Command;

use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Run `program args…` and return trimmed stdout on success.
pub(crate) fn run(program: &str, args: &[String]) -> Result<String, StoreError> {
    tracing::debug!(program, args = ?args, "running storage command");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| StoreError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(StoreError::Command {
            command: format!("{program} {}", args.join(" ")),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command whose stdout is a JSON document.
pub(crate) fn run_json<T: DeserializeOwned>(program: &str, args: &[String]) -> Result<T, StoreError> {
    let stdout = run(program, args)?;
    serde_json::from_str(&stdout).map_err(|e| StoreError::Parse {
        what: format!("{program} {}", args.first().map(String::as_str).unwrap_or_default()),
        reason: e.to_string(),
    })
}

/// Build an owned argument vector.
pub(crate) fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
