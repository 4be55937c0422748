//! # ferry-task
//!
//! Generic task runtime: a prepare/run state machine with a status tree,
//! re-entrancy rejection, skip propagation, panic containment and bounded
//! fan-out. Nothing in here knows about storage.
//!
//! Implement [`TaskBody`] for the task-specific part and wrap it in a
//! [`ManagedTask`]; parents hold children as `Arc<dyn Task>` and drive them
//! through [`run_all`] / [`prepare_all`].

use std::sync::Arc;

use async_trait::async_trait;

pub mod error;
pub mod fanout;
pub mod managed;
pub mod node;
pub mod view;

pub use error::TaskError;
pub use fanout::{prepare_all, run_all, run_parallel};
pub use managed::{ManagedTask, PrepareGate, TaskBody};
pub use node::{LogLine, StatusNode, MAX_MESSAGES};
pub use view::{StatusView, TaskView};

/// A node in the task hierarchy.
#[async_trait]
pub trait Task: Send + Sync {
    fn node(&self) -> &Arc<StatusNode>;

    fn id(&self) -> &str {
        self.node().id()
    }

    fn label(&self) -> &str {
        self.node().label()
    }

    async fn prepare(&self) -> Result<(), TaskError>;

    async fn run(&self) -> Result<(), TaskError>;

    fn children(&self) -> Vec<Arc<dyn Task>>;
}
