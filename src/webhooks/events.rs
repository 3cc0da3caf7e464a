//! Inbound event types.
//!
//! An [`Event`] is created at webhook ingress once the delivery has been
//! validated. It carries the raw JSON payload untouched (GitHub payloads are
//! platform-specific and only partially inspected), the task configuration in
//! force for this delivery, and an optional acknowledgement handle that is
//! released once the event's pipeline has been fully handled.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::types::{EventId, TaskConfig};

/// The immutable part of an event, shared by handlers, executors and status
/// builders for the lifetime of the orchestration.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub id: EventId,
    pub event_type: String,
    pub payload: Value,
}

impl EventData {
    pub fn new(id: EventId, event_type: impl Into<String>, payload: Value) -> Self {
        EventData {
            id,
            event_type: event_type.into(),
            payload,
        }
    }

    /// The payload's `action` field (e.g. `opened`), if present.
    pub fn action(&self) -> Option<&str> {
        self.payload.get("action").and_then(Value::as_str)
    }
}

/// Opaque acknowledgement for the message that carried an event.
///
/// Releasing the handle signals whoever delivered the event that it has been
/// fully processed. Dropping it without releasing closes the channel, which
/// the receiver observes as an error.
#[derive(Debug)]
pub struct MessageHandle {
    event_id: EventId,
    ack: Option<oneshot::Sender<EventId>>,
}

impl MessageHandle {
    /// Creates a handle and the receiver that observes its release.
    pub fn channel(event_id: EventId) -> (Self, oneshot::Receiver<EventId>) {
        let (tx, rx) = oneshot::channel();
        (
            MessageHandle {
                event_id,
                ack: Some(tx),
            },
            rx,
        )
    }

    /// Creates a handle nobody listens to.
    pub fn detached(event_id: EventId) -> Self {
        MessageHandle {
            event_id,
            ack: None,
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Acknowledges the message.
    pub fn release(mut self) {
        if let Some(tx) = self.ack.take() {
            // The receiver may have gone away; acknowledgement is best-effort.
            let _ = tx.send(self.event_id.clone());
        }
        trace!(event_id = %self.event_id, "Released message handle");
    }
}

/// A validated inbound event.
#[derive(Debug)]
pub struct Event {
    pub id: EventId,
    pub event_type: String,
    pub payload: Value,
    pub task_config: Arc<TaskConfig>,
    pub message_handle: Option<MessageHandle>,
}

impl Event {
    pub fn new(
        id: EventId,
        event_type: impl Into<String>,
        payload: Value,
        task_config: Arc<TaskConfig>,
    ) -> Self {
        Event {
            id,
            event_type: event_type.into(),
            payload,
            task_config,
            message_handle: None,
        }
    }

    /// Attaches an acknowledgement handle, builder style.
    pub fn with_message_handle(mut self, handle: MessageHandle) -> Self {
        self.message_handle = Some(handle);
        self
    }
}
