//! In-process queue and topic transports.
//!
//! Used when the agent runs standalone and by tests. Queues must be created
//! up front, as with a hosted queue service; topics are created on demand.
//! Topic subscribers receive announcements through a tokio broadcast channel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{MessageId, Status};

use super::{
    NotificationTopics, QueueReceiver, QueueUrl, ReceivedMessage, TopicArn, TransportError,
    WorkQueue,
};

const QUEUE_URL_PREFIX: &str = "memory://queue/";
const TOPIC_ARN_PREFIX: &str = "arn:memory:topic:";
const SUBSCRIBER_CAPACITY: usize = 64;
/// Recent messages kept per topic for inspection.
pub const TOPIC_HISTORY_LIMIT: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_id(counter: &AtomicU64, prefix: &str) -> MessageId {
    MessageId::new(format!("{prefix}-{}", counter.fetch_add(1, Ordering::Relaxed)))
}

/// Work queues held in memory.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<ReceivedMessage>>>,
    next_id: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport with the named queues already present.
    pub fn with_queues<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = Self::new();
        for name in names {
            queue.create_queue(name);
        }
        queue
    }

    /// Creates a queue. Existing queues keep their messages.
    pub fn create_queue(&self, name: impl Into<String>) -> QueueUrl {
        let name = name.into();
        let url = QueueUrl(format!("{QUEUE_URL_PREFIX}{name}"));
        lock(&self.queues).entry(name).or_default();
        url
    }

    /// Bodies currently on a queue, oldest first.
    pub fn messages(&self, name: &str) -> Vec<String> {
        lock(&self.queues)
            .get(name)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Queue bodies parsed as statuses. Bodies that are not statuses are skipped.
    pub fn statuses(&self, name: &str) -> Vec<Status> {
        self.messages(name)
            .iter()
            .filter_map(|body| serde_json::from_str(body).ok())
            .collect()
    }

    fn queue_name(url: &QueueUrl) -> Result<&str, TransportError> {
        url.0
            .strip_prefix(QUEUE_URL_PREFIX)
            .ok_or_else(|| TransportError::QueueNotFound(url.0.clone()))
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn queue_url(&self, queue_name: &str) -> Result<QueueUrl, TransportError> {
        if lock(&self.queues).contains_key(queue_name) {
            Ok(QueueUrl(format!("{QUEUE_URL_PREFIX}{queue_name}")))
        } else {
            Err(TransportError::QueueNotFound(queue_name.to_string()))
        }
    }

    async fn send_message(
        &self,
        queue: &QueueUrl,
        body: &str,
        delay: Duration,
    ) -> Result<MessageId, TransportError> {
        if !delay.is_zero() {
            return Err(TransportError::Other(
                "delayed delivery is not supported by the in-memory queue".to_string(),
            ));
        }

        let name = Self::queue_name(queue)?;
        let mut queues = lock(&self.queues);
        let messages = queues
            .get_mut(name)
            .ok_or_else(|| TransportError::QueueNotFound(name.to_string()))?;

        let id = next_id(&self.next_id, "msg");
        messages.push_back(ReceivedMessage {
            id: id.clone(),
            body: body.to_string(),
        });
        Ok(id)
    }
}

#[async_trait]
impl QueueReceiver for MemoryQueue {
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        max: usize,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let name = Self::queue_name(queue)?;
        let queues = lock(&self.queues);
        let messages = queues
            .get(name)
            .ok_or_else(|| TransportError::QueueNotFound(name.to_string()))?;
        Ok(messages.iter().take(max).cloned().collect())
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        id: &MessageId,
    ) -> Result<(), TransportError> {
        let name = Self::queue_name(queue)?;
        let mut queues = lock(&self.queues);
        if let Some(messages) = queues.get_mut(name) {
            messages.retain(|m| &m.id != id);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Topic {
    sender: broadcast::Sender<String>,
    published: VecDeque<String>,
}

impl Topic {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Topic {
            sender,
            published: VecDeque::new(),
        }
    }
}

/// Notification topics held in memory.
#[derive(Debug, Default)]
pub struct MemoryTopics {
    topics: Mutex<HashMap<String, Topic>>,
    next_id: AtomicU64,
}

impl MemoryTopics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a topic, creating it if needed.
    pub fn subscribe(&self, name: &str) -> broadcast::Receiver<String> {
        lock(&self.topics)
            .entry(name.to_string())
            .or_insert_with(Topic::new)
            .sender
            .subscribe()
    }

    /// The last [`TOPIC_HISTORY_LIMIT`] messages published to a topic,
    /// oldest first.
    pub fn published(&self, name: &str) -> Vec<String> {
        lock(&self.topics)
            .get(name)
            .map(|t| t.published.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn topic_count(&self) -> usize {
        lock(&self.topics).len()
    }
}

#[async_trait]
impl NotificationTopics for MemoryTopics {
    async fn create_topic(&self, name: &str) -> Result<TopicArn, TransportError> {
        lock(&self.topics)
            .entry(name.to_string())
            .or_insert_with(Topic::new);
        Ok(TopicArn(format!("{TOPIC_ARN_PREFIX}{name}")))
    }

    async fn publish(&self, topic: &TopicArn, message: &str) -> Result<MessageId, TransportError> {
        let name = topic
            .0
            .strip_prefix(TOPIC_ARN_PREFIX)
            .ok_or_else(|| TransportError::TopicNotFound(topic.0.clone()))?;

        let mut topics = lock(&self.topics);
        let entry = topics
            .get_mut(name)
            .ok_or_else(|| TransportError::TopicNotFound(name.to_string()))?;

        if entry.published.len() == TOPIC_HISTORY_LIMIT {
            entry.published.pop_front();
        }
        entry.published.push_back(message.to_string());
        // No subscribers is fine; the message is still recorded.
        let receivers = entry.sender.send(message.to_string()).unwrap_or(0);
        debug!(topic = name, receivers, "Delivered topic message");

        Ok(next_id(&self.next_id, "note"))
    }
}
