//! Recursive task-tree evaluation.
//!
//! The orchestrator walks an event's task tree and publishes, for every task:
//!
//! - one **initial** status: `pending`, or `error` if the task names an
//!   executor nobody registered;
//! - one **terminal** status (`success` or `error`) once the task's executor
//!   has run, for tasks whose executor is registered.
//!
//! # Ordering
//!
//! Each sibling list is handled in two phases. All initial statuses of the
//! list are published first (concurrently), then all tasks of the list are
//! processed (concurrently). A task with sub-tasks recursively handles them
//! and awaits that before its own executor starts, so a parent never runs
//! until its whole subtree has published terminal statuses.
//!
//! Siblings are independent: a failing, panicking or unpublishable task
//! affects only its own status. No timeout is applied to executors.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tracing::{debug, error, info, instrument, warn};

use crate::executor::{ExecutorError, ExecutorRegistry};
use crate::publisher::{PublishTargets, ResultPublisher};
use crate::types::{Status, Task, TaskOutcome, TaskState};
use crate::webhooks::events::EventData;


/// Description of a task that is waiting for its executor.
pub const PENDING_DESCRIPTION: &str = "Task Execution in Progress";
/// Target URL of pending statuses.
pub const PENDING_TARGET_URL: &str = "https://github.com";
/// Description of a passed task whose executor gave no message.
pub const SUCCESS_DESCRIPTION: &str = "Task Completed Successfully";
/// Description of a failed task whose executor gave no message.
pub const FAILURE_DESCRIPTION: &str = "Task Completed with Errors";
/// Description of a task whose executor returned an error or panicked.
pub const EXECUTION_FAILURE_DESCRIPTION: &str = "Task execution failure";

/// The terminal status fields derived from an executor's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub state: TaskState,
    pub description: String,
    pub url: Option<String>,
}

impl Verdict {
    /// Maps an executor outcome to the status it is reported as.
    pub fn from_outcome(task: &Task, outcome: &Result<TaskOutcome, ExecutorError>) -> Self {
        match outcome {
            Ok(TaskOutcome::NoMatchingTask) => Verdict {
                state: TaskState::Error,
                description: format!("Unknown Task Type: {}", task.context),
                url: None,
            },
            Ok(TaskOutcome::Completed(result)) if result.passed => Verdict {
                state: TaskState::Success,
                description: non_empty_or(result.message.as_deref(), SUCCESS_DESCRIPTION),
                url: result.url.clone(),
            },
            Ok(TaskOutcome::Completed(result)) => Verdict {
                state: TaskState::Error,
                description: non_empty_or(result.message.as_deref(), FAILURE_DESCRIPTION),
                url: result.url.clone(),
            },
            Err(_) => Verdict {
                state: TaskState::Error,
                description: EXECUTION_FAILURE_DESCRIPTION.to_string(),
                url: None,
            },
        }
    }
}

fn non_empty_or(message: Option<&str>, fallback: &str) -> String {
    message
        .filter(|m| !m.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Notification announcing a task's initial status.
pub fn pending_notification(event: &EventData, task: &Task) -> String {
    format!(
        "Pending for {} => {} - Event ID: {}",
        event.event_type,
        task.label(),
        event.id
    )
}

/// Notification announcing a task's terminal status.
pub fn result_notification(event: &EventData, task: &Task, state: TaskState) -> String {
    format!(
        "Result '{}' for {} => {} - Event ID: {}",
        state,
        event.event_type,
        task.label(),
        event.id
    )
}

/// Evaluates task trees against an executor registry, publishing statuses.
#[derive(Debug, Clone)]
pub struct TaskOrchestrator {
    executors: Arc<ExecutorRegistry>,
    publisher: ResultPublisher,
    targets: PublishTargets,
}

impl TaskOrchestrator {
    pub fn new(
        executors: Arc<ExecutorRegistry>,
        publisher: ResultPublisher,
        targets: PublishTargets,
    ) -> Self {
        TaskOrchestrator {
            executors,
            publisher,
            targets,
        }
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    /// Handles one sibling list: initial statuses for all of them, then
    /// processing of all of them.
    ///
    /// Resolves once every task in `tasks` (and below) has published its
    /// terminal status, or been skipped for an unknown executor.
    pub fn handle_tasks<'a>(
        &'a self,
        event: &'a Arc<EventData>,
        tasks: &'a [Task],
    ) -> BoxFuture<'a, ()> {
        async move {
            if tasks.is_empty() {
                return;
            }
            self.set_initial_task_state(event, tasks).await;
            self.process_tasks(event, tasks).await;
        }
        .boxed()
    }

    /// Publishes the initial status of every task in `tasks`, concurrently.
    pub async fn set_initial_task_state(&self, event: &Arc<EventData>, tasks: &[Task]) {
        join_all(tasks.iter().map(|task| self.publish_initial(event, task))).await;
    }

    /// Runs every task in `tasks`, concurrently.
    pub async fn process_tasks(&self, event: &Arc<EventData>, tasks: &[Task]) {
        join_all(tasks.iter().map(|task| self.process_task(event, task))).await;
    }

    async fn publish_initial(&self, event: &EventData, task: &Task) {
        let (state, description) = if self.executors.is_registered(&task.executor) {
            (TaskState::Pending, PENDING_DESCRIPTION.to_string())
        } else {
            warn!(
                event_id = %event.id,
                executor = %task.executor,
                context = %task.context,
                "Task references unknown executor"
            );
            (
                TaskState::Error,
                format!("Unknown Executor: {}", task.executor),
            )
        };

        let status = Status::for_pull_request(
            event,
            state,
            task.status_context(),
            description,
            Some(PENDING_TARGET_URL),
        );
        self.publish(&status, &pending_notification(event, task))
            .await;
    }

    #[instrument(
        skip_all,
        fields(event_id = %event.id, executor = %task.executor, context = %task.context)
    )]
    async fn process_task(&self, event: &Arc<EventData>, task: &Task) {
        if !self.executors.is_registered(&task.executor) {
            debug!("Skipping task with unknown executor");
            return;
        }

        if task.has_sub_tasks() {
            debug!(sub_tasks = task.sub_tasks.len(), "Running sub-tasks first");
            self.handle_tasks(event, &task.sub_tasks).await;
        }

        let Some(executor) = self.executors.create(&task.executor, Arc::clone(event)) else {
            error!("Executor disappeared from registry");
            return;
        };

        info!("Executing task");
        let outcome = AssertUnwindSafe(executor.execute_task(task))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ExecutorError::Panicked(panic_message(&*panic))));

        if let Err(e) = &outcome {
            error!(error = %e, "Task execution failed");
        }

        let verdict = Verdict::from_outcome(task, &outcome);
        info!(state = %verdict.state, description = %verdict.description, "Task finished");

        let status = Status::for_pull_request(
            event,
            verdict.state,
            task.status_context(),
            verdict.description,
            verdict.url.as_deref(),
        );
        self.publish(&status, &result_notification(event, task, verdict.state))
            .await;
    }

    async fn publish(&self, status: &Status, message: &str) {
        if let Err(e) = self
            .publisher
            .post_results_and_trigger(
                &self.targets.queue_name,
                status,
                &self.targets.topic_name,
                message,
            )
            .await
        {
            error!(
                event_id = %status.event_ref.event_id,
                context = %status.context,
                state = %status.state,
                error = %e,
                "Failed to publish task status"
            );
        }
    }
}
