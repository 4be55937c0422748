//! The root → job → volume hierarchy built from a [`BackupConfig`].

use std::sync::Arc;

use ferry_task::{StatusNode, Task, TaskError, TaskView};
use tokio_util::sync::CancellationToken;

use crate::backends::Backends;
use crate::config::BackupConfig;
use crate::job::{JobBody, JobTask};
use crate::root::{RootBody, RootTask};

pub const ROOT_ID: &str = "root";

/// Owns the task tree and the cancellation token shared by every copy.
pub struct BackupTree {
    root: Arc<RootTask>,
    jobs: Vec<Arc<JobTask>>,
    cancel: CancellationToken,
}

impl BackupTree {
    pub fn new(config: &BackupConfig, backends: Backends) -> Self {
        let cancel = CancellationToken::new();
        let node = StatusNode::root(ROOT_ID, "All jobs");
        let jobs: Vec<Arc<JobTask>> = config
            .jobs
            .iter()
            .map(|job| {
                Arc::new(JobTask::new(
                    node.child(&job.id.0, &job.label),
                    JobBody::new(Arc::clone(job), backends.clone(), cancel.child_token()),
                ))
            })
            .collect();
        let root = Arc::new(RootTask::new(node, RootBody::new(jobs.clone())));
        Self { root, jobs, cancel }
    }

    pub fn root(&self) -> &Arc<RootTask> {
        &self.root
    }

    pub fn node(&self) -> &Arc<StatusNode> {
        self.root.node()
    }

    pub fn jobs(&self) -> &[Arc<JobTask>] {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Arc<JobTask>> {
        self.jobs.iter().find(|j| j.id() == id)
    }

    pub fn view(&self) -> TaskView {
        self.node().view()
    }

    /// Run the root (`None`) or one job, but only if it is idle. A busy
    /// target yields [`TaskError::InProgress`] and is left untouched.
    pub async fn trigger(&self, job: Option<&str>) -> Result<(), TaskError> {
        let task: Arc<dyn Task> = match job {
            None => Arc::clone(&self.root) as Arc<dyn Task>,
            Some(id) => self
                .job(id)
                .map(|j| Arc::clone(j) as Arc<dyn Task>)
                .ok_or_else(|| TaskError::Failed(format!("unknown job '{id}'")))?,
        };
        if !task.node().kind().is_idle() {
            tracing::info!(task = %task.node().path(), "trigger ignored, task is active");
            return Err(TaskError::InProgress);
        }
        task.run().await
    }

    /// Whether the root (or `job`) or anything beneath it ended badly.
    pub fn is_bad(&self, job: Option<&str>) -> bool {
        let node = match job.and_then(|id| self.job(id)) {
            Some(j) => Arc::clone(j.node()),
            None => Arc::clone(self.node()),
        };
        node.view().any_bad()
    }

    /// Stop in-flight copies; they fail with a cancellation error.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
