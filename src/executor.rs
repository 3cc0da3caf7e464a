//! The executor contract.
//!
//! An executor knows how to perform one kind of task (a Jenkins job, a lint
//! run, ...) and report pass or fail. Concrete executors live outside this
//! crate; they are registered by name in an [`ExecutorRegistry`] and
//! constructed per task with the event being processed.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::registry::PluginRegistry;
use crate::types::{Task, TaskConfig, TaskOutcome};
use crate::webhooks::events::EventData;

/// Registry namespace for executors.
pub const EXECUTOR_NAMESPACE: &str = "executors";

/// Registry of executor variants, keyed by the task's `executor` field.
pub type ExecutorRegistry = PluginRegistry<Arc<EventData>, Box<dyn Executor>>;

/// Errors an executor can report instead of a result.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor could not run the task.
    #[error("task execution failed: {0}")]
    Failed(String),

    /// The executor panicked while running the task.
    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutorError::Failed(message.into())
    }
}

/// Runs one task and reports its result.
///
/// Implementations should enforce their own timeouts; the orchestrator waits
/// for as long as `execute_task` takes.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes `task`.
    ///
    /// Returns [`TaskOutcome::NoMatchingTask`] when this executor does not
    /// handle the task's kind.
    async fn execute_task(&self, task: &Task) -> Result<TaskOutcome, ExecutorError>;
}

/// Executors named in `config` that `executors` cannot construct, sorted.
pub fn unregistered_executors<'a>(executors: &ExecutorRegistry, config: &'a TaskConfig) -> Vec<&'a str> {
    config
        .executor_names()
        .into_iter()
        .filter(|name| !executors.is_registered(name))
        .collect()
}

/// Creates an empty executor registry.
pub fn executor_registry() -> ExecutorRegistry {
    ExecutorRegistry::new(EXECUTOR_NAMESPACE)
}
