//! The prepare/run state machine shared by every task.

use std::sync::Arc;

use async_trait::async_trait;
use ferry_core::StatusKind;
use tokio::sync::Mutex;

use crate::error::TaskError;
use crate::node::StatusNode;
use crate::Task;

/// Whether a task has discovered its children since its last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrepareGate {
    #[default]
    NotPrepared,
    Prepared,
}

/// Task-specific behaviour plugged into [`ManagedTask`].
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    /// Discover children or validate preconditions. Called with the task's
    /// lock held; must be safe to call repeatedly.
    async fn prepare(&self, _node: &Arc<StatusNode>) -> Result<(), TaskError> {
        Ok(())
    }

    /// Do the work. `Ok(Some(msg))` becomes the success message.
    async fn work(&self, node: &Arc<StatusNode>) -> Result<Option<String>, TaskError>;

    /// Children materialised by the last `prepare`.
    fn children(&self) -> Vec<Arc<dyn Task>> {
        Vec::new()
    }
}

/// Wraps a [`TaskBody`] with locking, gate handling and status bookkeeping.
///
/// `prepare` and `run` both take the task lock with `try_lock`; a concurrent
/// call gets [`TaskError::InProgress`] and leaves the in-flight status alone.
pub struct ManagedTask<B> {
    node: Arc<StatusNode>,
    gate: Mutex<PrepareGate>,
    body: B,
}

impl<B: TaskBody> ManagedTask<B> {
    pub fn new(node: Arc<StatusNode>, body: B) -> Self {
        Self {
            node,
            gate: Mutex::new(PrepareGate::NotPrepared),
            body,
        }
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn node(&self) -> &Arc<StatusNode> {
        &self.node
    }

    /// Current gate state; `None` while the task is busy.
    pub fn gate(&self) -> Option<PrepareGate> {
        self.gate.try_lock().ok().map(|g| *g)
    }

    pub async fn prepare(&self) -> Result<(), TaskError> {
        let mut gate = self.gate.try_lock().map_err(|_| TaskError::InProgress)?;
        self.prepare_locked(&mut gate).await
    }

    async fn prepare_locked(&self, gate: &mut PrepareGate) -> Result<(), TaskError> {
        self.node.set_status(StatusKind::Preparing, "");
        match self.body.prepare(&self.node).await {
            Ok(()) => {
                *gate = PrepareGate::Prepared;
                self.node.set_status(StatusKind::Ready, "");
                Ok(())
            }
            Err(err) => {
                *gate = PrepareGate::NotPrepared;
                self.node.set_status(StatusKind::Failed, err.to_string());
                Err(err)
            }
        }
    }

    /// Prepare if needed, then do the work and settle the final status.
    /// The gate is always `NotPrepared` afterwards.
    pub async fn run(&self) -> Result<(), TaskError> {
        let mut gate = self.gate.try_lock().map_err(|_| TaskError::InProgress)?;
        if *gate == PrepareGate::NotPrepared {
            self.prepare_locked(&mut gate).await?;
        }
        *gate = PrepareGate::NotPrepared;

        self.node.set_status(StatusKind::InProgress, "");
        match self.body.work(&self.node).await {
            Ok(summary) => match self.node.finish(summary) {
                0 => Ok(()),
                failed => Err(TaskError::ChildrenFailed { failed }),
            },
            Err(err) => {
                self.node.set_status(StatusKind::Failed, err.to_string());
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<B: TaskBody> Task for ManagedTask<B> {
    fn node(&self) -> &Arc<StatusNode> {
        &self.node
    }

    async fn prepare(&self) -> Result<(), TaskError> {
        ManagedTask::prepare(self).await
    }

    async fn run(&self) -> Result<(), TaskError> {
        ManagedTask::run(self).await
    }

    fn children(&self) -> Vec<Arc<dyn Task>> {
        self.body.children()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
