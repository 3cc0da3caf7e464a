//! Event-type handlers and the router that selects them.
//!
//! Each GitHub event type with configured behavior has an [`EventHandler`]
//! registered by name in a [`HandlerRegistry`]. The [`EventRouter`] creates a
//! fresh handler per event, awaits it, and releases the event's message
//! handle afterwards.
//!
//! | Event type | Handler |
//! |------------|---------|
//! | `pull_request` | [`PullRequestHandler`]: `opened` and `synchronize` run the configured tasks |

mod pull_request;
mod router;
pub mod template;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::orchestrator::TaskOrchestrator;
use crate::registry::PluginRegistry;
use crate::types::{EventId, Task};
use crate::webhooks::events::{Event, EventData, MessageHandle};

pub use pull_request::PullRequestHandler;
pub use router::{EventRouter, RouteError};
pub use template::{TemplateVars, basic_template, template_replace};

/// Registry namespace for event handlers.
pub const HANDLER_NAMESPACE: &str = "event-handlers";

/// Registry of event handlers, keyed by GitHub event type.
pub type HandlerRegistry = PluginRegistry<Event, Box<dyn EventHandler>>;

/// Errors a handler can fail an event with.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload is not shaped like this event type's payload.
    #[error("invalid {event_type} payload: {reason}")]
    InvalidPayload {
        event_type: String,
        reason: String,
    },
}

/// What handling an event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The configured tasks ran; `tasks` counts the top-level ones.
    Processed { tasks: usize },

    /// The event was deliberately ignored.
    Skipped { reason: String },
}

/// Handles one event of the type it is registered for.
#[async_trait]
pub trait EventHandler: Send {
    /// Processes the event. Resolves once every top-level task reached a
    /// terminal state and its status was published.
    async fn handle_event(&mut self) -> Result<HandleOutcome, HandlerError>;

    /// Takes the acknowledgement handle, leaving `None` behind.
    fn take_message_handle(&mut self) -> Option<MessageHandle>;
}

/// State every handler starts from, extracted from the event.
#[derive(Debug)]
pub struct HandlerBase {
    pub event: Arc<EventData>,
    pub tasks: Vec<Task>,
    message_handle: Option<MessageHandle>,
}

impl HandlerBase {
    pub fn new(event: Event) -> Self {
        let Event {
            id,
            event_type,
            payload,
            task_config,
            message_handle,
        } = event;

        info!(event_id = %id, event_type = %event_type, "New event");

        let tasks = match task_config.tasks_for(&event_type) {
            Some(tasks) => tasks.to_vec(),
            None => {
                error!(
                    event_id = %id,
                    event_type = %event_type,
                    "No tasks configured for event type"
                );
                Vec::new()
            }
        };

        HandlerBase {
            event: Arc::new(EventData::new(id, event_type, payload)),
            tasks,
            message_handle,
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event.id
    }

    pub fn event_type(&self) -> &str {
        &self.event.event_type
    }

    pub fn take_message_handle(&mut self) -> Option<MessageHandle> {
        self.message_handle.take()
    }
}

/// Creates an empty handler registry.
pub fn handler_registry() -> HandlerRegistry {
    HandlerRegistry::new(HANDLER_NAMESPACE)
}

/// Creates a handler registry with the built-in handlers registered.
pub fn default_handler_registry(orchestrator: Arc<TaskOrchestrator>) -> HandlerRegistry {
    handler_registry().with(PullRequestHandler::EVENT_TYPE, move |event| {
        Box::new(PullRequestHandler::new(event, Arc::clone(&orchestrator))) as Box<dyn EventHandler>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskConfig;
    use serde_json::json;

    fn config() -> Arc<TaskConfig> {
        Arc::new(TaskConfig::new().with_tasks("pull_request", vec![Task::new("ci", "build")]))
    }

    #[test]
    fn base_extracts_configured_tasks() {
        let event = Event::new(EventId::from("e1"), "pull_request", json!({}), config());
        let base = HandlerBase::new(event);

        assert_eq!(base.event_id(), &EventId::from("e1"));
        assert_eq!(base.event_type(), "pull_request");
        assert_eq!(base.tasks, vec![Task::new("ci", "build")]);
    }

    #[test]
    fn base_without_config_entry_has_no_tasks() {
        let event = Event::new(EventId::from("e1"), "push", json!({}), config());
        assert!(HandlerBase::new(event).tasks.is_empty());
    }

    #[test]
    fn base_hands_over_message_handle_once() {
        let event = Event::new(EventId::from("e1"), "pull_request", json!({}), config())
            .with_message_handle(MessageHandle::detached(EventId::from("e1")));
        let mut base = HandlerBase::new(event);

        assert!(base.take_message_handle().is_some());
        assert!(base.take_message_handle().is_none());
    }
}
