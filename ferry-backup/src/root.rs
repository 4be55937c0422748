//! Root task: fans out over every configured job.

use std::sync::Arc;

use async_trait::async_trait;
use ferry_task::{prepare_all, run_all, ManagedTask, StatusNode, Task, TaskBody, TaskError};

use crate::job::JobTask;

pub type RootTask = ManagedTask<RootBody>;

pub struct RootBody {
    jobs: Vec<Arc<JobTask>>,
}

impl RootBody {
    pub fn new(jobs: Vec<Arc<JobTask>>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl TaskBody for RootBody {
    /// A job that fails to prepare is reported on its own node; the root
    /// stays usable so the other jobs can still run.
    async fn prepare(&self, node: &Arc<StatusNode>) -> Result<(), TaskError> {
        let errors = prepare_all(&self.children()).await;
        if !errors.is_empty() {
            tracing::warn!(task = %node.path(), failed = errors.len(), "jobs failed to prepare");
        }
        Ok(())
    }

    async fn work(&self, _node: &Arc<StatusNode>) -> Result<Option<String>, TaskError> {
        run_all(&self.children(), None).await;
        Ok(None)
    }

    fn children(&self) -> Vec<Arc<dyn Task>> {
        self.jobs
            .iter()
            .map(|j| Arc::clone(j) as Arc<dyn Task>)
            .collect()
    }
}
