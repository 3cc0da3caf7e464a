//! Routes validated events to the handler registered for their type.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::webhooks::events::Event;

use super::{HandleOutcome, HandlerError, HandlerRegistry};

/// Errors that fail an event at routing time.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no handler registered for event type '{0}'")]
    UnknownEventType(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Dispatches events to per-type handlers.
#[derive(Debug, Clone)]
pub struct EventRouter {
    handlers: Arc<HandlerRegistry>,
}

impl EventRouter {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        EventRouter { handlers }
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.is_registered(event_type)
    }

    /// Creates the handler for `event.event_type`, awaits it, then releases
    /// the event's message handle whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`RouteError::UnknownEventType`] if no handler is registered.
    /// - [`RouteError::Handler`] if the handler failed the event.
    #[instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn route(&self, mut event: Event) -> Result<HandleOutcome, RouteError> {
        let event_type = event.event_type.clone();

        if !self.handlers.is_registered(&event_type) {
            warn!("No handler for event type");
            if let Some(handle) = event.message_handle.take() {
                handle.release();
            }
            return Err(RouteError::UnknownEventType(event_type));
        }

        let Some(mut handler) = self.handlers.create(&event_type, event) else {
            return Err(RouteError::UnknownEventType(event_type));
        };

        let result = handler.handle_event().await;

        if let Some(handle) = handler.take_message_handle() {
            handle.release();
        }

        match &result {
            Ok(outcome) => info!(?outcome, "Event handled"),
            Err(e) => error!(error = %e, "Event handler failed"),
        }
        result.map_err(RouteError::from)
    }
}
