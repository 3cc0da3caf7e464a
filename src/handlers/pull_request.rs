//! Handler for `pull_request` webhook events.
//!
//! | Action | Behavior |
//! |--------|----------|
//! | `opened` | Template and run the configured tasks |
//! | `synchronize` | Template and run the configured tasks |
//! | anything else | Skipped |

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::orchestrator::TaskOrchestrator;
use crate::types::Task;
use crate::webhooks::events::{Event, MessageHandle};

use super::template::{basic_template, template_replace};
use super::{EventHandler, HandleOutcome, HandlerBase, HandlerError};

/// Actions that trigger the configured tasks.
const PROCESSED_ACTIONS: &[&str] = &["opened", "synchronize"];

pub struct PullRequestHandler {
    base: HandlerBase,
    orchestrator: Arc<TaskOrchestrator>,
}

impl PullRequestHandler {
    pub const EVENT_TYPE: &'static str = "pull_request";

    pub fn new(event: Event, orchestrator: Arc<TaskOrchestrator>) -> Self {
        PullRequestHandler {
            base: HandlerBase::new(event),
            orchestrator,
        }
    }
}

#[async_trait]
impl EventHandler for PullRequestHandler {
    #[instrument(skip_all, fields(event_id = %self.base.event_id()))]
    async fn handle_event(&mut self) -> Result<HandleOutcome, HandlerError> {
        let event = Arc::clone(&self.base.event);

        if !event.payload.is_object() {
            return Err(HandlerError::InvalidPayload {
                event_type: event.event_type.clone(),
                reason: "payload is not a JSON object".to_string(),
            });
        }

        let action = match event.action() {
            Some(action) if PROCESSED_ACTIONS.contains(&action) => action,
            other => {
                let action = other.unwrap_or("<none>");
                info!(action, "Ignoring pull request action");
                return Ok(HandleOutcome::Skipped {
                    reason: format!("action '{action}' is not processed"),
                });
            }
        };

        info!(
            action,
            tasks = self.base.tasks.len(),
            tree_size = self.base.tasks.iter().map(Task::tree_size).sum::<usize>(),
            "Processing pull request"
        );

        let vars = basic_template(&event.payload, &event.id);
        let tasks = template_replace(&vars, &self.base.tasks);
        self.orchestrator.handle_tasks(&event, &tasks).await;

        Ok(HandleOutcome::Processed { tasks: tasks.len() })
    }

    fn take_message_handle(&mut self) -> Option<MessageHandle> {
        self.base.take_message_handle()
    }
}
