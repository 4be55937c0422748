//! Job task: discovers the volumes of one source pool and backs them up
//! with bounded concurrency.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use ferry_sync::SyncError;
use ferry_task::{run_all, ManagedTask, StatusNode, Task, TaskBody, TaskError};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::backends::Backends;
use crate::config::JobConfig;
use crate::volume::{blocking, SharedPool, VolumeBody, VolumeTask};

pub type JobTask = ManagedTask<JobBody>;

pub struct JobBody {
    config: Arc<JobConfig>,
    backends: Backends,
    volumes: Mutex<Vec<Arc<VolumeTask>>>,
    cancel: CancellationToken,
}

impl JobBody {
    pub fn new(config: Arc<JobConfig>, backends: Backends, cancel: CancellationToken) -> Self {
        Self {
            config,
            backends,
            volumes: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn config(&self) -> &Arc<JobConfig> {
        &self.config
    }

    /// Volume tasks from the latest prepare, in name order.
    pub fn volumes(&self) -> Vec<Arc<VolumeTask>> {
        self.volumes.lock().clone()
    }
}

#[async_trait]
impl TaskBody for JobBody {
    async fn prepare(&self, node: &Arc<StatusNode>) -> Result<(), TaskError> {
        node.log("Enumerating volumes");
        let config = Arc::clone(&self.config);
        let backends = self.backends.clone();
        let (pool, names) = blocking(move || -> Result<_, SyncError> {
            let target = format!("{}/{}", config.cluster.cluster_name, config.source_pool);
            let pool = backends
                .source
                .connect(&config.cluster, &config.source_pool)
                .map_err(|e| SyncError::Connection {
                    target: target.clone(),
                    source: e,
                })?;
            let names = pool.volume_names().map_err(|e| SyncError::Discovery {
                what: format!("volumes in {target}"),
                source: e,
            })?;
            Ok((pool, names))
        })
        .await?
        .map_err(TaskError::work)?;

        let mut selected: Vec<String> = names
            .into_iter()
            .filter(|n| self.config.selects(n))
            .collect();
        selected.sort();
        selected.dedup();
        if selected.is_empty() {
            return Err(TaskError::Failed("no volumes found".to_string()));
        }

        let shared: SharedPool = Arc::new(Mutex::new(pool));
        let mut volumes = self.volumes.lock();
        let next: Vec<Arc<VolumeTask>> = selected
            .iter()
            .map(|name| {
                let task = volumes
                    .iter()
                    .find(|v| v.body().name() == name)
                    .cloned()
                    .unwrap_or_else(|| {
                        Arc::new(ManagedTask::new(
                            node.child(name, name),
                            VolumeBody::new(
                                name.as_str(),
                                Arc::clone(&self.config),
                                self.backends.clone(),
                                self.cancel.clone(),
                            ),
                        ))
                    });
                task.body().attach(Arc::clone(&shared));
                task
            })
            .collect();
        node.retain_children(&selected.iter().cloned().collect::<BTreeSet<_>>());
        *volumes = next;
        node.log(format!("Found {} volumes", selected.len()));
        Ok(())
    }

    async fn work(&self, node: &Arc<StatusNode>) -> Result<Option<String>, TaskError> {
        let children = self.children();
        let limit = Arc::new(Semaphore::new(self.config.max_concurrency));
        let errors = run_all(&children, Some(limit)).await;
        if !errors.is_empty() {
            tracing::warn!(task = %node.path(), failed = errors.len(), "volumes failed");
        }
        Ok(Some(format!("{} volumes", children.len())))
    }

    fn children(&self) -> Vec<Arc<dyn Task>> {
        self.volumes
            .lock()
            .iter()
            .map(|v| Arc::clone(v) as Arc<dyn Task>)
            .collect()
    }
}
