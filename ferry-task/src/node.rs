//! The shared status tree.
//!
//! Every task owns one [`StatusNode`]. Nodes are mutated by their owning task
//! and read concurrently by observers (the daemon status endpoint), so each
//! node guards its state with its own `RwLock`. A parent lock is never held
//! while a child lock is taken.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_core::{Status, StatusKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::view::{StatusView, TaskView};

/// Messages retained per task; older ones are dropped first.
pub const MAX_MESSAGES: usize = 200;

/// One line of a task's message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Default)]
struct NodeState {
    status: Status,
    messages: VecDeque<LogLine>,
    children: BTreeMap<String, Arc<StatusNode>>,
    counters: Map<String, Value>,
    detail: Map<String, Value>,
}

/// Status, message log, counters and detail data for one task.
#[derive(Debug)]
pub struct StatusNode {
    id: String,
    label: String,
    path: String,
    state: RwLock<NodeState>,
}

impl StatusNode {
    /// Create a node with no parent.
    pub fn root(id: impl Into<String>, label: impl Into<String>) -> Arc<Self> {
        let id = id.into();
        Arc::new(Self {
            path: id.clone(),
            label: label.into(),
            id,
            state: RwLock::new(NodeState::default()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Slash-separated ids from the root, e.g. `root/vms/vm-100-disk-0`.
    pub fn path(&self) -> &str {
        &self.path
    }

    // -----------------------------------------------------------------------
    // Children
    // -----------------------------------------------------------------------

    /// Return the child with `id`, creating it if absent. An existing child
    /// keeps its accumulated status and history.
    pub fn child(&self, id: &str, label: &str) -> Arc<StatusNode> {
        if let Some(existing) = self.state.read().children.get(id) {
            return Arc::clone(existing);
        }
        let mut state = self.state.write();
        let node = state.children.entry(id.to_string()).or_insert_with(|| {
            Arc::new(StatusNode {
                id: id.to_string(),
                label: label.to_string(),
                path: format!("{}/{}", self.path, id),
                state: RwLock::new(NodeState::default()),
            })
        });
        Arc::clone(node)
    }

    /// Drop children whose ids are not in `keep`.
    pub fn retain_children(&self, keep: &BTreeSet<String>) {
        self.state.write().children.retain(|id, _| keep.contains(id));
    }

    pub fn children(&self) -> Vec<Arc<StatusNode>> {
        self.state.read().children.values().cloned().collect()
    }

    /// Resolve a slash-separated path of child ids relative to this node.
    /// An empty path resolves to the node itself.
    pub fn find(self: &Arc<Self>, path: &str) -> Option<Arc<StatusNode>> {
        let mut node = Arc::clone(self);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = node.state.read().children.get(segment).cloned()?;
            node = next;
        }
        Some(node)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn status(&self) -> Status {
        self.state.read().status.clone()
    }

    pub fn kind(&self) -> StatusKind {
        self.state.read().status.kind
    }

    /// Change status and record the transition in the message log.
    ///
    /// Entering a terminal status marks every child that never started as
    /// `Skipped`.
    pub fn set_status(&self, kind: StatusKind, message: impl Into<String>) {
        let message = message.into();
        let (old, children) = {
            let mut state = self.state.write();
            let old = state.status.kind;
            state.status = Status::new(kind, message.clone());
            let children: Vec<_> = if kind.is_terminal() {
                state.children.values().cloned().collect()
            } else {
                Vec::new()
            };
            (old, children)
        };

        let line = if message.is_empty() {
            format!("{old} -> {kind}")
        } else {
            format!("{old} -> {kind}: {message}")
        };
        if kind.is_bad() {
            tracing::warn!(task = %self.path, "{line}");
        } else {
            tracing::info!(task = %self.path, "{line}");
        }
        self.push_message(line);

        for child in children {
            if child.kind() == StatusKind::NotStarted {
                child.set_status(StatusKind::Skipped, "");
            }
        }
    }

    /// Finish the task: `ChildrenFailed` if any child ended badly, otherwise
    /// `Success` with the optional summary. Returns the failed-child count.
    pub fn finish(&self, summary: Option<String>) -> usize {
        let failed = self
            .children()
            .iter()
            .filter(|c| {
                let kind = c.kind();
                kind.is_terminal() && kind.is_bad()
            })
            .count();
        if failed > 0 {
            self.set_status(
                StatusKind::ChildrenFailed,
                format!("{failed} children failed"),
            );
        } else {
            self.set_status(StatusKind::Success, summary.unwrap_or_default());
        }
        failed
    }

    // -----------------------------------------------------------------------
    // Message log
    // -----------------------------------------------------------------------

    /// Append a free-form message to the log.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(task = %self.path, "{message}");
        self.push_message(message);
    }

    fn push_message(&self, message: String) {
        let mut state = self.state.write();
        if state.messages.len() == MAX_MESSAGES {
            state.messages.pop_front();
        }
        state.messages.push_back(LogLine {
            at: Utc::now(),
            message,
        });
    }

    pub fn messages(&self) -> Vec<LogLine> {
        self.state.read().messages.iter().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Counters and detail
    // -----------------------------------------------------------------------

    /// Set a lightweight counter published with every status poll.
    pub fn set_counter(&self, key: &str, value: impl Into<Value>) {
        self.state.write().counters.insert(key.to_string(), value.into());
    }

    pub fn counters(&self) -> Map<String, Value> {
        self.state.read().counters.clone()
    }

    /// Store a bulky report that is only served on request.
    pub fn set_detail(&self, key: &str, value: impl Into<Value>) {
        self.state.write().detail.insert(key.to_string(), value.into());
    }

    pub fn detail(&self) -> Map<String, Value> {
        self.state.read().detail.clone()
    }

    /// Snapshot this node and its descendants.
    pub fn view(&self) -> TaskView {
        let (status, counters, children) = {
            let state = self.state.read();
            (
                state.status.clone(),
                state.counters.clone(),
                state.children.values().cloned().collect::<Vec<_>>(),
            )
        };
        TaskView {
            id: self.id.clone(),
            label: self.label.clone(),
            status: StatusView::from(&status),
            counters,
            children: children.iter().map(|c| c.view()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn child_is_reused_by_id() {
        let root = StatusNode::root("root", "Root");
        let a = root.child("a", "A");
        a.set_status(StatusKind::Success, "done");
        let again = root.child("a", "ignored");
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(again.label(), "A");
        assert_eq!(again.kind(), StatusKind::Success);
        assert_eq!(again.path(), "root/a");
    }

    #[rstest]
    #[case(StatusKind::Success, StatusKind::Skipped)]
    #[case(StatusKind::Failed, StatusKind::Skipped)]
    #[case(StatusKind::ChildrenFailed, StatusKind::Skipped)]
    #[case(StatusKind::Skipped, StatusKind::Skipped)]
    #[case(StatusKind::InProgress, StatusKind::NotStarted)]
    #[case(StatusKind::Finishing, StatusKind::NotStarted)]
    #[case(StatusKind::Ready, StatusKind::NotStarted)]
    fn parent_status_decides_whether_unstarted_children_are_skipped(
        #[case] parent: StatusKind,
        #[case] idle_after: StatusKind,
    ) {
        let root = StatusNode::root("root", "Root");
        let done = root.child("done", "done");
        let idle = root.child("idle", "idle");
        done.set_status(StatusKind::Success, "");
        root.set_status(parent, "");
        assert_eq!(done.kind(), StatusKind::Success);
        assert_eq!(idle.kind(), idle_after);
    }

    #[test]
    fn finish_counts_bad_children() {
        let root = StatusNode::root("root", "Root");
        root.child("a", "a").set_status(StatusKind::Failed, "x");
        root.child("b", "b").set_status(StatusKind::ChildrenFailed, "1 children failed");
        root.child("c", "c").set_status(StatusKind::Success, "");
        assert_eq!(root.finish(Some("ok".into())), 2);
        assert_eq!(
            root.status(),
            Status::new(StatusKind::ChildrenFailed, "2 children failed")
        );
    }

    #[test]
    fn finish_without_failures_uses_summary() {
        let root = StatusNode::root("root", "Root");
        root.child("a", "a").set_status(StatusKind::Success, "");
        assert_eq!(root.finish(Some("all good".into())), 0);
        assert_eq!(root.status(), Status::new(StatusKind::Success, "all good"));
    }

    #[test]
    fn message_log_is_bounded() {
        let node = StatusNode::root("n", "n");
        for i in 0..(MAX_MESSAGES + 10) {
            node.log(format!("line {i}"));
        }
        let messages = node.messages();
        assert_eq!(messages.len(), MAX_MESSAGES);
        assert_eq!(messages[0].message, "line 10");
    }

    #[test]
    fn transitions_are_logged() {
        let node = StatusNode::root("n", "n");
        node.set_status(StatusKind::Preparing, "");
        node.set_status(StatusKind::Failed, "no volumes found");
        let lines: Vec<_> = node.messages().into_iter().map(|l| l.message).collect();
        assert_eq!(
            lines,
            vec![
                "Not Started -> Preparing".to_string(),
                "Preparing -> Failed: no volumes found".to_string(),
            ]
        );
    }

    #[test]
    fn find_walks_child_ids() {
        let root = StatusNode::root("root", "Root");
        let vol = root.child("vms", "VMs").child("vm-1", "vm-1");
        let found = root.find("vms/vm-1").expect("found");
        assert!(Arc::ptr_eq(&vol, &found));
        assert!(root.find("vms/missing").is_none());
        assert!(Arc::ptr_eq(&root.find("").expect("self"), &root));
    }

    #[test]
    fn retain_children_drops_vanished_ids() {
        let root = StatusNode::root("root", "Root");
        root.child("a", "a");
        root.child("b", "b");
        root.retain_children(&BTreeSet::from(["b".to_string()]));
        let ids: Vec<_> = root.children().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["b"]);
    }
}
