//! Task definitions, task configuration and executor results.
//!
//! A task is a node in a tree: it names the executor that runs it, a display
//! context, free-form parameters, and optional sub-tasks that must all reach
//! a terminal state before the task itself runs.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A configured unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Name of the registered executor variant that runs this task.
    pub executor: String,

    /// Human-readable label used in status reporting.
    #[serde(default)]
    pub context: String,

    /// Executor-specific parameters. Older configs call these `options`.
    #[serde(default, alias = "options")]
    pub parameters: Map<String, Value>,

    /// Tasks that must finish before this task's executor runs.
    #[serde(default, rename = "tasks", alias = "subTasks", skip_serializing_if = "Vec::is_empty")]
    pub sub_tasks: Vec<Task>,
}

impl Task {
    pub fn new(executor: impl Into<String>, context: impl Into<String>) -> Self {
        Task {
            executor: executor.into(),
            context: context.into(),
            parameters: Map::new(),
            sub_tasks: Vec::new(),
        }
    }

    /// Adds a parameter, builder style.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Sets the sub-tasks, builder style.
    pub fn with_sub_tasks(mut self, sub_tasks: Vec<Task>) -> Self {
        self.sub_tasks = sub_tasks;
        self
    }

    /// Returns true if this task declares sub-tasks.
    pub fn has_sub_tasks(&self) -> bool {
        !self.sub_tasks.is_empty()
    }

    /// Label used as the status context: `"<executor>: <context>"`.
    pub fn status_context(&self) -> String {
        format!("{}: {}", self.executor, self.context)
    }

    /// Label used in notification messages: `"<executor>:<context>"`.
    pub fn label(&self) -> String {
        format!("{}:{}", self.executor, self.context)
    }

    /// Counts this task plus every task nested below it.
    pub fn tree_size(&self) -> usize {
        1 + self.sub_tasks.iter().map(Task::tree_size).sum::<usize>()
    }
}

/// Tasks configured for one event type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTasks {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Errors loading a task configuration.
#[derive(Debug, Error)]
pub enum TaskConfigError {
    #[error("failed to read task config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid task config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Maps an event type (e.g. `pull_request`) to its configured task list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskConfig(pub HashMap<String, EventTasks>);

impl TaskConfig {
    pub fn new() -> Self {
        TaskConfig(HashMap::new())
    }

    /// Sets the tasks for an event type, builder style.
    pub fn with_tasks(mut self, event_type: impl Into<String>, tasks: Vec<Task>) -> Self {
        self.0.insert(event_type.into(), EventTasks { tasks });
        self
    }

    /// Returns the tasks configured for `event_type`, if any.
    pub fn tasks_for(&self, event_type: &str) -> Option<&[Task]> {
        self.0.get(event_type).map(|e| e.tasks.as_slice())
    }

    /// Every executor named anywhere in the configuration, sub-tasks included.
    pub fn executor_names(&self) -> BTreeSet<&str> {
        fn collect<'a>(tasks: &'a [Task], names: &mut BTreeSet<&'a str>) {
            for task in tasks {
                names.insert(task.executor.as_str());
                collect(&task.sub_tasks, names);
            }
        }

        let mut names = BTreeSet::new();
        for event_tasks in self.0.values() {
            collect(&event_tasks.tasks, &mut names);
        }
        names
    }

    pub fn from_json(json: &str) -> Result<Self, TaskConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a task configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, TaskConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}

/// The pass/fail report of an executor run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl TaskResult {
    pub fn passed() -> Self {
        TaskResult {
            passed: true,
            ..Default::default()
        }
    }

    pub fn failed() -> Self {
        TaskResult::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// What an executor reports back for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The executor ran the task.
    Completed(TaskResult),

    /// The executor does not know how to run this kind of task.
    NoMatchingTask,
}

impl From<TaskResult> for TaskOutcome {
    fn from(result: TaskResult) -> Self {
        TaskOutcome::Completed(result)
    }
}
