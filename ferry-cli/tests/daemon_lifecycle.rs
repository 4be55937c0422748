use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn ferry_bin_path() -> PathBuf {
    PathBuf::from(assert_cmd::cargo::cargo_bin!("ferry"))
}

fn ferry(binary: &Path, home: &Path) -> Command {
    let mut cmd = Command::new(binary);
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

struct DaemonProcess {
    child: Child,
    binary: PathBuf,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(binary: PathBuf, home: PathBuf, config: &Path) -> Self {
        let child = ferry(&binary, &home)
            .args(["daemon", "start", "--config"])
            .arg(config)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        Self {
            child,
            binary,
            home,
        }
    }

    /// Ask politely, then kill. Returns whether the daemon exited by itself.
    fn stop(&mut self) -> bool {
        let _ = ferry(&self.binary, &self.home).args(["daemon", "stop"]).status();

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return true;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
        false
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.stop();
        }
    }
}

fn daemon_status(binary: &Path, home: &Path) -> Option<serde_json::Value> {
    let output = ferry(binary, home).args(["daemon", "status"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = serde_json::from_slice::<serde_json::Value>(&output.stdout).ok()?;
    value.get("tree").is_some().then_some(value)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn daemon_serves_status_detail_and_stops() {
    let home = TempDir::new().expect("home");
    let config = home.path().join("ferry.yaml");
    fs::write(
        &config,
        format!(
            "clusters:\n  main:\n    confFile: {}\njobs:\n  - id: vms\n    cluster: main\n    sourcePool: rbd\n    destination: tank/backups\n",
            home.path().join("absent.conf").display()
        ),
    )
    .expect("write config");

    let binary = ferry_bin_path();
    let mut daemon = DaemonProcess::start(binary.clone(), home.path().to_path_buf(), &config);
    assert!(
        wait_until(Duration::from_secs(10), || daemon_status(&binary, home.path()).is_some()),
        "daemon did not answer status in time",
    );

    let status = daemon_status(&binary, home.path()).expect("status");
    assert_eq!(status["tree"]["id"], "root");
    assert_eq!(status["tree"]["children"][0]["id"], "vms");

    // The initial prepare enumerates volumes and fails on the missing ceph.conf.
    assert!(
        wait_until(Duration::from_secs(10), || {
            ferry(&binary, home.path())
                .args(["daemon", "detail", "vms"])
                .output()
                .map(|out| {
                    let stdout = String::from_utf8_lossy(&out.stdout);
                    stdout.contains("Enumerating volumes") && stdout.contains("[Failed]")
                })
                .unwrap_or(false)
        }),
        "job detail never showed the failed prepare",
    );

    let unknown = ferry(&binary, home.path())
        .args(["daemon", "trigger", "--job", "nope"])
        .output()
        .expect("trigger");
    assert!(!unknown.status.success());
    assert!(String::from_utf8_lossy(&unknown.stderr).contains("unknown job 'nope'"));

    assert!(daemon.stop(), "daemon did not exit after stop");
    assert!(!home.path().join(".ferry").join("ferry.sock").exists());
}
