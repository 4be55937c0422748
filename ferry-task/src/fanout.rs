//! Concurrent fan-out over child tasks.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use ferry_core::StatusKind;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinError;

use crate::error::TaskError;
use crate::node::StatusNode;
use crate::Task;

/// Run `op` for every child concurrently and collect the failures.
///
/// With a `limit`, a child that cannot take a slot immediately is marked
/// `Waiting` until one frees up. Each child runs on its own tokio task; a
/// panic is caught at the join and recorded as a `Failed` status on that
/// child only. [`TaskError::InProgress`] results are left out of the
/// returned list.
pub async fn run_parallel<F, Fut>(
    children: &[Arc<dyn Task>],
    limit: Option<Arc<Semaphore>>,
    op: F,
) -> Vec<TaskError>
where
    F: Fn(Arc<dyn Task>) -> Fut,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    let mut handles = Vec::with_capacity(children.len());
    for child in children {
        let work = op(Arc::clone(child));
        let node = Arc::clone(child.node());
        let limit = limit.clone();
        let handle = tokio::spawn(async move {
            let _permit = match limit {
                Some(sem) => Some(acquire(sem, &node).await?),
                None => None,
            };
            work.await
        });
        handles.push((Arc::clone(child.node()), handle));
    }

    let mut errors = Vec::new();
    for (node, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join) => Err(contain(&node, join)),
        };
        match result {
            Err(err) if !err.is_conflict() => errors.push(err),
            _ => {}
        }
    }
    errors
}

/// Prepare every child concurrently, without a concurrency bound.
pub async fn prepare_all(children: &[Arc<dyn Task>]) -> Vec<TaskError> {
    run_parallel(children, None, |child| async move { child.prepare().await }).await
}

/// Run every child concurrently under an optional bound.
pub async fn run_all(children: &[Arc<dyn Task>], limit: Option<Arc<Semaphore>>) -> Vec<TaskError> {
    run_parallel(children, limit, |child| async move { child.run().await }).await
}

async fn acquire(sem: Arc<Semaphore>, node: &StatusNode) -> Result<OwnedSemaphorePermit, TaskError> {
    match Arc::clone(&sem).try_acquire_owned() {
        Ok(permit) => Ok(permit),
        Err(TryAcquireError::NoPermits) => {
            node.set_status(StatusKind::Waiting, "waiting for a free slot");
            sem.acquire_owned().await.map_err(|_| TaskError::Cancelled)
        }
        Err(TryAcquireError::Closed) => Err(TaskError::Cancelled),
    }
}

fn contain(node: &StatusNode, join: JoinError) -> TaskError {
    if !join.is_panic() {
        node.set_status(StatusKind::Failed, "cancelled");
        return TaskError::Cancelled;
    }
    let msg = panic_message(join.into_panic());
    node.set_status(StatusKind::Failed, format!("recovered from panic: {msg}"));
    TaskError::Panicked(msg)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
