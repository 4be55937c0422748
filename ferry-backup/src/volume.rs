//! Per-volume task: one backup cycle followed by retention.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ferry_sync::store::SourcePool;
use ferry_sync::{apply_retention, SyncError, Synchronizer};
use ferry_task::{ManagedTask, StatusNode, TaskBody, TaskError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::backends::Backends;
use crate::config::JobConfig;
use crate::progress::NodeProgress;

/// A source pool connection shared by every volume of one job.
pub type SharedPool = Arc<Mutex<Box<dyn SourcePool>>>;

pub type VolumeTask = ManagedTask<VolumeBody>;

pub struct VolumeBody {
    name: String,
    job: Arc<JobConfig>,
    backends: Backends,
    pool: Mutex<Option<SharedPool>>,
    cancel: CancellationToken,
}

impl VolumeBody {
    pub fn new(
        name: impl Into<String>,
        job: Arc<JobConfig>,
        backends: Backends,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            job,
            backends,
            pool: Mutex::new(None),
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand over the connection made by the job's latest prepare.
    pub(crate) fn attach(&self, pool: SharedPool) {
        *self.pool.lock() = Some(pool);
    }
}

#[async_trait]
impl TaskBody for VolumeBody {
    async fn work(&self, node: &Arc<StatusNode>) -> Result<Option<String>, TaskError> {
        let pool = self
            .pool
            .lock()
            .clone()
            .ok_or_else(|| TaskError::Failed("no source connection".to_string()))?;
        let node = Arc::clone(node);
        let name = self.name.clone();
        let job = Arc::clone(&self.job);
        let backends = self.backends.clone();
        let cancel = self.cancel.clone();

        blocking(move || cycle(&job, &backends, &pool, &name, &node, &cancel)).await?
    }
}

/// Run blocking storage work off the async runtime. A panic inside `f` is
/// re-raised so the fan-out boundary sees it.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, TaskError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
        Err(_) => Err(TaskError::Cancelled),
    }
}

fn cycle(
    job: &JobConfig,
    backends: &Backends,
    pool: &SharedPool,
    name: &str,
    node: &Arc<StatusNode>,
    cancel: &CancellationToken,
) -> Result<Option<String>, TaskError> {
    let progress = NodeProgress::new(Arc::clone(node));
    let mut source = pool
        .lock()
        .open_volume(name)
        .map_err(|e| {
            TaskError::work(SyncError::Discovery {
                what: format!("volume {}/{name}", job.source_pool),
                source: e,
            })
        })?;

    let synchronizer = Synchronizer::new(
        Arc::clone(&backends.destination),
        Arc::clone(&backends.opener),
        backends.sync_options(&job.snapshot_prefix),
    );
    let (report, mut destination) = synchronizer
        .sync(source.as_mut(), &job.destination, Utc::now(), cancel, &progress)
        .map_err(TaskError::work)?;

    node.set_counter("bytesWritten", report.bytes_written);
    node.set_counter("bytesDiscarded", report.bytes_discarded);
    node.set_counter("snapshot", report.snapshot.clone());
    node.set_counter("commonSnapshot", report.common.clone());
    node.set_detail(
        "reconciliation",
        serde_json::to_value(&report.audit).unwrap_or(Value::Null),
    );

    let pruned = apply_retention(&job.retention, source.as_mut(), destination.as_mut(), &progress)
        .map_err(TaskError::work)?;
    node.set_detail(
        "pruning",
        serde_json::to_value(&pruned).unwrap_or(Value::Null),
    );

    Ok(Some(report.summary()))
}
