//! Task templates and the concrete task definitions built from them.

use crate::{CoreError, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A single step executed by the task store's executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Run a shell script.
    Run(RunAction),
    /// Fetch an artifact into the task's container.
    Download(DownloadAction),
    /// Push a file out of the task's container.
    Upload(UploadAction),
}

/// Run a script with a timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAction {
    /// Script passed to the shell.
    pub script: String,

    /// Timeout in seconds (0 means no timeout).
    #[serde(default)]
    pub timeout_secs: u64,

    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl RunAction {
    /// Create a new RunAction.
    pub fn new(script: impl Into<String>, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            timeout_secs: timeout.as_secs(),
            env: HashMap::new(),
        }
    }

    /// The action that echoes a task id, used to mark a task as ours.
    pub fn echo(task_id: &TaskId, timeout: Duration) -> Self {
        Self::new(format!("echo '{}'", task_id), timeout)
    }

    /// Timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Download an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadAction {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub extract: bool,
}

/// Upload a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAction {
    pub from: String,
    pub to: String,
}

/// The shape every dispatched task is stamped from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Root filesystem / stack the store should run the task on.
    #[serde(default)]
    pub stack: Option<String>,

    /// Actions executed after the identifying marker.
    pub actions: Vec<Action>,

    /// Labels copied onto every task.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl TaskTemplate {
    /// Create a template from an action list.
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            stack: None,
            actions,
            labels: HashMap::new(),
        }
    }

    /// Parse a template from JSON.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let template: Self = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    /// Builder method to set the stack.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Builder method to add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// A template needs at least one action of its own.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.actions.is_empty() {
            return Err(CoreError::InvalidInput(
                "task template must contain at least one action".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the concrete task for `id`.
    ///
    /// The template is cloned, never mutated, so concurrent dispatch units
    /// can share one template. An `echo '<id>'` run action is placed ahead
    /// of the template's own actions.
    pub fn instantiate(&self, id: TaskId, marker_timeout: Duration) -> TaskDefinition {
        let mut actions = Vec::with_capacity(self.actions.len() + 1);
        actions.push(Action::Run(RunAction::echo(&id, marker_timeout)));
        actions.extend(self.actions.iter().cloned());

        TaskDefinition {
            id,
            stack: self.stack.clone(),
            actions,
            labels: self.labels.clone(),
            created_at: Utc::now(),
        }
    }
}

/// A task ready to be handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique task identifier.
    pub id: TaskId,

    /// Stack the task runs on.
    pub stack: Option<String>,

    /// Marker action followed by the template actions.
    pub actions: Vec<Action>,

    /// Task labels.
    pub labels: HashMap<String, String>,

    /// When the task was built.
    pub created_at: DateTime<Utc>,
}

impl TaskDefinition {
    /// The identifying action placed first in the action list.
    pub fn marker(&self) -> Option<&RunAction> {
        match self.actions.first() {
            Some(Action::Run(run)) => Some(run),
            _ => None,
        }
    }
}
