//! Feeds synchronizer progress into a task's status node.

use std::sync::Arc;

use ferry_core::StatusKind;
use ferry_sync::{Phase, Progress};
use ferry_task::StatusNode;

pub(crate) struct NodeProgress {
    node: Arc<StatusNode>,
}

impl NodeProgress {
    pub(crate) fn new(node: Arc<StatusNode>) -> Self {
        Self { node }
    }
}

impl Progress for NodeProgress {
    fn phase(&self, phase: Phase, message: &str) {
        let kind = match phase {
            Phase::Preparing => StatusKind::Preparing,
            Phase::Copying => StatusKind::InProgress,
            Phase::Finishing => StatusKind::Finishing,
        };
        self.node.set_status(kind, message);
    }

    fn log(&self, message: &str) {
        self.node.log(message);
    }

    fn copied(&self, bytes_written: u64, bytes_discarded: u64) {
        self.node.set_counter("bytesWritten", bytes_written);
        self.node.set_counter("bytesDiscarded", bytes_discarded);
    }
}
