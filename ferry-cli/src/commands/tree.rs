//! Table rendering of a status tree, shared by `run` and `status`.

use colored::Colorize;
use ferry_core::StatusKind;
use ferry_task::TaskView;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "task")]
    task: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "written")]
    written: String,
    #[tabled(rename = "snapshot")]
    snapshot: String,
    #[tabled(rename = "message")]
    message: String,
}

fn rows(view: &TaskView) -> Vec<TaskRow> {
    view.walk()
        .into_iter()
        .map(|(depth, task)| TaskRow {
            task: format!("{}{}", "  ".repeat(depth), task.label),
            status: task.status.label.clone(),
            written: task
                .counters
                .get("bytesWritten")
                .and_then(Value::as_u64)
                .map(format_bytes)
                .unwrap_or_default(),
            snapshot: task
                .counters
                .get("snapshot")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            message: task.status.message.clone(),
        })
        .collect()
}

/// Summary line plus one table row per task, depth-first.
pub fn print_tree(view: &TaskView) {
    let walk = view.walk();
    let failed = walk.iter().filter(|(_, v)| v.status.bad).count();
    let active = walk.iter().filter(|(_, v)| v.status.active).count();

    let overall = match view.status.kind {
        kind if kind.is_bad() => view.status.label.red().bold(),
        StatusKind::Success => view.status.label.green().bold(),
        _ if view.status.active => view.status.label.yellow().bold(),
        _ => view.status.label.bright_black().bold(),
    };
    println!(
        "ferry v{} | {} | {} tasks | {} active | {} failed",
        env!("CARGO_PKG_VERSION"),
        overall,
        walk.len(),
        active,
        failed,
    );

    let mut table = Table::new(rows(view));
    table.with(Style::rounded());
    println!("{table}");
}

/// Binary units, one decimal place.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_task::StatusNode;

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(4096), "4.0 KiB");
        assert_eq!(format_bytes(10 * 1024 * 1024 * 1024), "10.0 GiB");
    }

    #[test]
    fn rows_are_indented_by_depth() {
        let root = StatusNode::root("root", "All jobs");
        let job = root.child("vms", "VM disks");
        let volume = job.child("vm-1", "vm-1");
        volume.set_counter("bytesWritten", 2048u64);
        volume.set_counter("snapshot", "ferry-2024-01-01-00:00:00");

        let rows = rows(&root.view());
        let tasks: Vec<&str> = rows.iter().map(|r| r.task.as_str()).collect();
        assert_eq!(tasks, vec!["All jobs", "  VM disks", "    vm-1"]);
        assert_eq!(rows[2].written, "2.0 KiB");
        assert_eq!(rows[2].snapshot, "ferry-2024-01-01-00:00:00");
        assert_eq!(rows[0].written, "");
    }
}
