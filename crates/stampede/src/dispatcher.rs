//! Dispatcher - fans task creation out to the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::info;

use stampede_core::{TaskId, TaskTemplate};

use crate::error::StampedeError;
use crate::store::TaskStore;

/// When a task was handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub task_id: TaskId,
    pub submitted_at: Instant,
}

/// Outcome of one dispatch unit.
pub type DispatchResult = Result<TaskId, StampedeError>;

/// Creates tasks from a shared template.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    template: Arc<TaskTemplate>,
    marker_timeout: Duration,
}

impl Dispatcher {
    /// Create a new Dispatcher.
    pub fn new(store: Arc<dyn TaskStore>, template: TaskTemplate, marker_timeout: Duration) -> Self {
        Self {
            store,
            template: Arc::new(template),
            marker_timeout,
        }
    }

    /// Launch `count` dispatch units, all at once.
    ///
    /// Each unit sends its SubmissionRecord on `submissions` before calling
    /// `create`. Dropping the returned set aborts units that have not
    /// finished.
    pub fn spawn(
        &self,
        count: usize,
        submissions: mpsc::UnboundedSender<SubmissionRecord>,
    ) -> JoinSet<DispatchResult> {
        let mut units = JoinSet::new();
        for _ in 0..count {
            let store = Arc::clone(&self.store);
            let template = Arc::clone(&self.template);
            let submissions = submissions.clone();
            let marker_timeout = self.marker_timeout;

            units.spawn(async move {
                dispatch_one(store.as_ref(), &template, marker_timeout, &submissions).await
            });
        }
        units
    }
}

async fn dispatch_one(
    store: &dyn TaskStore,
    template: &TaskTemplate,
    marker_timeout: Duration,
    submissions: &mpsc::UnboundedSender<SubmissionRecord>,
) -> DispatchResult {
    let task_id = TaskId::generate();
    let task = template.instantiate(task_id.clone(), marker_timeout);

    let record = SubmissionRecord {
        task_id: task_id.clone(),
        submitted_at: Instant::now(),
    };
    if submissions.send(record).is_err() {
        return Err(StampedeError::DispatchAborted(format!(
            "correlator gone before task {} was submitted",
            task_id
        )));
    }

    store
        .create(task)
        .await
        .map_err(|source| StampedeError::Dispatch {
            task_id: task_id.clone(),
            source,
        })?;

    info!(task_id = %task_id, "Desired task");
    Ok(task_id)
}
