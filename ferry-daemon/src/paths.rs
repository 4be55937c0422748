use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "ferry.sock";

pub fn ferry_root(home: &Path) -> PathBuf {
    home.join(".ferry")
}

pub fn socket_path(home: &Path) -> PathBuf {
    ferry_root(home).join(DAEMON_SOCKET)
}

/// Default configuration file, `<home>/.ferry/ferry.yaml`.
pub fn config_path(home: &Path) -> PathBuf {
    ferry_root(home).join("ferry.yaml")
}
