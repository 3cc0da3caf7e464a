//! Result publication through a work queue and a notification topic.
//!
//! Every status produced by the orchestrator is handed to
//! [`ResultPublisher::post_results_and_trigger`], which:
//!
//! 1. resolves the work queue by name (a missing queue is an error, not retried)
//! 2. enqueues the serialized status with no delay (failures are logged only)
//! 3. creates or gets the notification topic
//! 4. publishes a human-readable message announcing the result
//!
//! Delivery is best-effort and at-most-once: there is no retry and no
//! dead-lettering at this layer.
//!
//! The queue and topic themselves are external services reached through the
//! [`WorkQueue`] and [`NotificationTopics`] traits. [`memory`] provides
//! in-process implementations and [`spool`] a filesystem-backed queue.

pub mod memory;
pub mod spool;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::types::{MessageId, Status};

pub use memory::{MemoryQueue, MemoryTopics};
pub use spool::{SpoolQueue, SpoolQueueError};

/// Address of a resolved work queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueUrl(pub String);

/// Address of a resolved notification topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicArn(pub String);

/// Errors reported by a queue or topic transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("queue does not exist: {0}")]
    QueueNotFound(String),

    #[error("topic does not exist: {0}")]
    TopicNotFound(String),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Other(String),
}

/// A message read back off a work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub body: String,
}

/// Point-to-point channel carrying serialized statuses.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Resolves a queue name to its address.
    async fn queue_url(&self, queue_name: &str) -> Result<QueueUrl, TransportError>;

    /// Enqueues `body`, to become visible after `delay`.
    async fn send_message(
        &self,
        queue: &QueueUrl,
        body: &str,
        delay: Duration,
    ) -> Result<MessageId, TransportError>;
}

/// Consumer side of a work queue.
#[async_trait]
pub trait QueueReceiver: Send + Sync {
    /// Returns up to `max` messages in enqueue order without removing them.
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        max: usize,
    ) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Removes a message once it has been handled.
    async fn delete_message(&self, queue: &QueueUrl, id: &MessageId)
    -> Result<(), TransportError>;
}

/// Publish/subscribe channel announcing that new results are available.
#[async_trait]
pub trait NotificationTopics: Send + Sync {
    /// Creates the topic if needed and returns its address. Idempotent.
    async fn create_topic(&self, name: &str) -> Result<TopicArn, TransportError>;

    /// Publishes `message` to a topic.
    async fn publish(&self, topic: &TopicArn, message: &str) -> Result<MessageId, TransportError>;
}

/// A serialized status plus the notification text describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// JSON body of the status; what the work queue carries.
    pub body: String,
    /// Human-readable announcement for the notification topic.
    pub notification: String,
}

impl QueueMessage {
    pub fn new(status: &Status, notification: impl Into<String>) -> Result<Self, serde_json::Error> {
        Ok(QueueMessage {
            body: serde_json::to_string(status)?,
            notification: notification.into(),
        })
    }
}

/// Names of the queue and topic results are published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTargets {
    pub queue_name: String,
    pub topic_name: String,
}

impl PublishTargets {
    pub fn new(queue_name: impl Into<String>, topic_name: impl Into<String>) -> Self {
        PublishTargets {
            queue_name: queue_name.into(),
            topic_name: topic_name.into(),
        }
    }
}

/// Errors from publishing a result.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize status: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to resolve queue '{queue}': {source}")]
    QueueLookup {
        queue: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to create topic '{topic}': {source}")]
    TopicCreate {
        topic: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to publish to topic '{topic}': {source}")]
    TopicPublish {
        topic: String,
        #[source]
        source: TransportError,
    },
}

/// What a successful publish produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Queue message id, or `None` if the enqueue failed.
    pub queue_message_id: Option<MessageId>,
    /// Topic message id.
    pub topic_message_id: MessageId,
}

/// Pushes statuses to the work queue and announces them on a topic.
#[derive(Clone)]
pub struct ResultPublisher {
    queue: Arc<dyn WorkQueue>,
    topics: Arc<dyn NotificationTopics>,
}

impl ResultPublisher {
    pub fn new(queue: Arc<dyn WorkQueue>, topics: Arc<dyn NotificationTopics>) -> Self {
        ResultPublisher { queue, topics }
    }

    /// Serializes `status`, enqueues it on `queue_name`, then publishes
    /// `message` on `topic_name`.
    ///
    /// # Errors
    ///
    /// - [`PublishError::QueueLookup`] if the queue does not exist; nothing is
    ///   enqueued or published.
    /// - [`PublishError::TopicCreate`] / [`PublishError::TopicPublish`] if the
    ///   announcement fails. The status may already be on the queue.
    ///
    /// An enqueue failure is logged and does not stop the announcement.
    #[instrument(
        skip(self, status, message),
        fields(context = %status.context, state = %status.state)
    )]
    pub async fn post_results_and_trigger(
        &self,
        queue_name: &str,
        status: &Status,
        topic_name: &str,
        message: &str,
    ) -> Result<PublishReceipt, PublishError> {
        let queue_message = QueueMessage::new(status, message)?;
        self.publish(queue_name, topic_name, &queue_message).await
    }

    /// Publishes an already serialized [`QueueMessage`].
    pub async fn publish(
        &self,
        queue_name: &str,
        topic_name: &str,
        message: &QueueMessage,
    ) -> Result<PublishReceipt, PublishError> {
        let queue_url = self
            .queue
            .queue_url(queue_name)
            .await
            .map_err(|source| PublishError::QueueLookup {
                queue: queue_name.to_string(),
                source,
            })?;

        let queue_message_id = match self
            .queue
            .send_message(&queue_url, &message.body, Duration::ZERO)
            .await
        {
            Ok(id) => {
                debug!(queue = queue_name, message_id = %id, "Enqueued result");
                Some(id)
            }
            Err(e) => {
                error!(queue = queue_name, error = %e, "Failed to enqueue result");
                None
            }
        };

        let topic = self
            .topics
            .create_topic(topic_name)
            .await
            .map_err(|source| PublishError::TopicCreate {
                topic: topic_name.to_string(),
                source,
            })?;

        let topic_message_id = self
            .topics
            .publish(&topic, &message.notification)
            .await
            .map_err(|source| PublishError::TopicPublish {
                topic: topic_name.to_string(),
                source,
            })?;

        debug!(
            topic = topic_name,
            message = %message.notification,
            "Published result notification"
        );

        Ok(PublishReceipt {
            queue_message_id,
            topic_message_id,
        })
    }
}

impl std::fmt::Debug for ResultPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultPublisher").finish_non_exhaustive()
    }
}
