//! Serialisable read-only snapshot of a status tree.

use ferry_core::{Status, StatusKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status with its facets spelled out for clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub kind: StatusKind,
    pub label: String,
    pub message: String,
    pub terminal: bool,
    pub bad: bool,
    pub active: bool,
}

impl From<&Status> for StatusView {
    fn from(status: &Status) -> Self {
        Self {
            kind: status.kind,
            label: status.kind.label().to_string(),
            message: status.message.clone(),
            terminal: status.kind.is_terminal(),
            bad: status.kind.is_bad(),
            active: status.kind.is_active(),
        }
    }
}

/// One task and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: String,
    pub label: String,
    pub status: StatusView,
    #[serde(default)]
    pub counters: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<TaskView>,
}

impl TaskView {
    /// Depth-first walk yielding `(depth, view)`.
    pub fn walk(&self) -> Vec<(usize, &TaskView)> {
        let mut out = Vec::new();
        fn visit<'a>(v: &'a TaskView, depth: usize, out: &mut Vec<(usize, &'a TaskView)>) {
            out.push((depth, v));
            for c in &v.children {
                visit(c, depth + 1, out);
            }
        }
        visit(self, 0, &mut out);
        out
    }

    /// True if this node or any descendant is bad.
    pub fn any_bad(&self) -> bool {
        self.walk().iter().any(|(_, v)| v.status.bad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StatusNode;

    #[test]
    fn view_serializes_facets() {
        let root = StatusNode::root("root", "All jobs");
        root.child("vms", "VMs")
            .set_status(StatusKind::Failed, "no volumes found");
        root.set_counter("jobs", 1);

        let json = serde_json::to_value(root.view()).expect("serialize");
        assert_eq!(json["id"], "root");
        assert_eq!(json["counters"]["jobs"], 1);
        let child = &json["children"][0];
        assert_eq!(child["status"]["kind"], "failed");
        assert_eq!(child["status"]["bad"], true);
        assert_eq!(child["status"]["terminal"], true);
        assert_eq!(child["status"]["active"], false);
    }

    #[test]
    fn walk_is_depth_first() {
        let root = StatusNode::root("r", "r");
        root.child("a", "a").child("a1", "a1");
        root.child("b", "b");
        let view = root.view();
        let ids: Vec<_> = view
            .walk()
            .into_iter()
            .map(|(d, v)| (d, v.id.as_str()))
            .collect();
        assert_eq!(ids, vec![(0, "r"), (1, "a"), (2, "a1"), (1, "b")]);
        assert!(!view.any_bad());
    }
}
