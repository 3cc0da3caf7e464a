//! Webhook endpoint handler.
//!
//! Validates the delivery against the raw body, builds an [`Event`] and
//! hands it to the event router on a background task before returning
//! 202 Accepted. Orchestration results travel through the results queue,
//! never through this response.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info};

use super::AppState;
use crate::types::EventId;
use crate::webhooks::events::{Event, MessageHandle};
use crate::webhooks::validator::ValidationError;

/// Errors that reject a webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::Validation(ValidationError::MissingSecret) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            WebhookError::Validation(ValidationError::SignatureMismatch) => StatusCode::UNAUTHORIZED,
            WebhookError::Validation(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidJson(_) => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Response
///
/// - 202 Accepted: delivery validated and queued for routing
/// - 400 Bad Request: missing header or invalid JSON
/// - 401 Unauthorized: signature mismatch
/// - 500 Internal Server Error: no webhook secret configured
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    // Signature is checked on the bytes as received, before parsing.
    let delivery = app_state.validator().validate(&headers, &body)?;

    let payload: serde_json::Value = serde_json::from_slice(&body)?;

    let event_id = EventId::from(delivery.delivery_id);
    debug!(event_id = %event_id, event_type = %delivery.event_type, "Received webhook");

    if !app_state.router().handles(&delivery.event_type) {
        info!(event_id = %event_id, event_type = %delivery.event_type, "Ignoring event type with no handler");
        return Ok((StatusCode::ACCEPTED, "Accepted"));
    }

    let event = Event::new(
        event_id.clone(),
        delivery.event_type,
        payload,
        app_state.task_config(),
    )
    .with_message_handle(MessageHandle::detached(event_id));

    let router = app_state.router().clone();
    // The router logs the outcome.
    app_state.tasks().spawn(async move {
        let _ = router.route(event).await;
    });

    Ok((StatusCode::ACCEPTED, "Accepted"))
}
