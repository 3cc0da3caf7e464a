//! Shared test doubles: recording transports, scripted executors and
//! canned webhook payloads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::executor::{Executor, ExecutorError, ExecutorRegistry, executor_registry};
use crate::orchestrator::TaskOrchestrator;
use crate::publisher::{
    NotificationTopics, PublishTargets, QueueUrl, ResultPublisher, TopicArn, TransportError,
    WorkQueue,
};
use crate::types::{EventId, MessageId, Status, Task, TaskOutcome, TaskResult, TaskState};
use crate::webhooks::events::EventData;

pub const TEST_QUEUE: &str = "test-results";
pub const TEST_TOPIC: &str = "test-announce";

/// An ordered log shared between transports and executors, so tests can
/// assert on the interleaving of executions and publications.
#[derive(Debug, Default)]
pub struct Journal(Mutex<Vec<String>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Queue and topic transport that records everything it is given.
///
/// Every enqueued status is journalled as `"status <context> <state>"`.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub journal: Arc<Journal>,
    statuses: Mutex<Vec<Status>>,
    notifications: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new(journal: Arc<Journal>) -> Self {
        RecordingTransport {
            journal,
            ..Default::default()
        }
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn statuses_for(&self, context: &str) -> Vec<Status> {
        self.statuses()
            .into_iter()
            .filter(|s| s.context == context)
            .collect()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkQueue for RecordingTransport {
    async fn queue_url(&self, queue_name: &str) -> Result<QueueUrl, TransportError> {
        Ok(QueueUrl(format!("recording://{queue_name}")))
    }

    async fn send_message(
        &self,
        _queue: &QueueUrl,
        body: &str,
        _delay: Duration,
    ) -> Result<MessageId, TransportError> {
        let status: Status =
            serde_json::from_str(body).map_err(|e| TransportError::Other(e.to_string()))?;
        self.journal
            .push(format!("status {} {}", status.context, status.state));
        let mut statuses = self.statuses.lock().unwrap();
        statuses.push(status);
        Ok(MessageId::new(format!("msg-{}", statuses.len())))
    }
}

#[async_trait]
impl NotificationTopics for RecordingTransport {
    async fn create_topic(&self, name: &str) -> Result<TopicArn, TransportError> {
        Ok(TopicArn(format!("recording:{name}")))
    }

    async fn publish(&self, _topic: &TopicArn, message: &str) -> Result<MessageId, TransportError> {
        let mut notifications = self.notifications.lock().unwrap();
        notifications.push(message.to_string());
        Ok(MessageId::new(format!("note-{}", notifications.len())))
    }
}

/// A queue that resolves but rejects every message.
#[derive(Debug, Default)]
pub struct FailingQueue;

#[async_trait]
impl WorkQueue for FailingQueue {
    async fn queue_url(&self, queue_name: &str) -> Result<QueueUrl, TransportError> {
        Ok(QueueUrl(format!("failing://{queue_name}")))
    }

    async fn send_message(
        &self,
        _queue: &QueueUrl,
        _body: &str,
        _delay: Duration,
    ) -> Result<MessageId, TransportError> {
        Err(TransportError::Other("queue is rejecting messages".to_string()))
    }
}

/// What a [`ScriptedExecutor`] does for a given task context.
#[derive(Debug, Clone)]
pub enum Scripted {
    Pass,
    PassWith { message: String, url: String },
    Fail,
    FailWith(String),
    NoMatch,
    Error(String),
    Panic,
    /// Sleeps, then passes.
    Slow(Duration),
}

/// Executor whose behavior per task context is fixed by a script.
///
/// Journals `"execute <executor>: <context>"` when a run starts. Contexts
/// missing from the script pass.
pub struct ScriptedExecutor {
    script: Arc<HashMap<String, Scripted>>,
    journal: Arc<Journal>,
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute_task(&self, task: &Task) -> Result<TaskOutcome, ExecutorError> {
        self.journal
            .push(format!("execute {}", task.status_context()));
        match self.script.get(&task.context).cloned().unwrap_or(Scripted::Pass) {
            Scripted::Pass => Ok(TaskResult::passed().into()),
            Scripted::PassWith { message, url } => {
                Ok(TaskResult::passed().with_message(message).with_url(url).into())
            }
            Scripted::Fail => Ok(TaskResult::failed().into()),
            Scripted::FailWith(message) => Ok(TaskResult::failed().with_message(message).into()),
            Scripted::NoMatch => Ok(TaskOutcome::NoMatchingTask),
            Scripted::Error(message) => Err(ExecutorError::failed(message)),
            Scripted::Panic => panic!("scripted executor panic"),
            Scripted::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(TaskResult::passed().into())
            }
        }
    }
}

/// Builds an executor registry with one scripted executor per name.
pub fn scripted_registry<'a>(
    names: impl IntoIterator<Item = &'a str>,
    script: HashMap<String, Scripted>,
    journal: Arc<Journal>,
) -> ExecutorRegistry {
    let script = Arc::new(script);
    let mut registry = executor_registry();
    for name in names {
        let script = Arc::clone(&script);
        let journal = Arc::clone(&journal);
        registry.register(name, move |_event| {
            Box::new(ScriptedExecutor {
                script: Arc::clone(&script),
                journal: Arc::clone(&journal),
            }) as Box<dyn Executor>
        });
    }
    registry
}

/// Builds an orchestrator publishing into `transport`.
pub fn recording_orchestrator(
    executors: ExecutorRegistry,
    transport: Arc<RecordingTransport>,
) -> TaskOrchestrator {
    let publisher = ResultPublisher::new(transport.clone(), transport);
    TaskOrchestrator::new(
        Arc::new(executors),
        publisher,
        PublishTargets::new(TEST_QUEUE, TEST_TOPIC),
    )
}

/// A realistic pull-request webhook payload.
pub fn pull_request_payload(action: &str) -> Value {
    json!({
        "action": action,
        "number": 42,
        "pull_request": {
            "number": 42,
            "head": { "sha": "a".repeat(40), "ref": "feature/login" },
            "base": { "sha": "b".repeat(40), "ref": "main" }
        },
        "repository": {
            "name": "hello-world",
            "full_name": "octocat/hello-world",
            "owner": { "login": "octocat" }
        }
    })
}

pub fn pull_request_event(action: &str) -> EventData {
    EventData::new(
        EventId::from("evt-42"),
        "pull_request",
        pull_request_payload(action),
    )
}

/// Statuses in `statuses` whose state is `state`.
pub fn with_state(statuses: &[Status], state: TaskState) -> Vec<&Status> {
    statuses.iter().filter(|s| s.state == state).collect()
}
