//! Webhook authenticity checks.
//!
//! Every inbound delivery passes through [`WebhookValidator::validate`] before
//! its body is parsed. The checks run in a fixed order and stop at the first
//! failure, so a request missing several headers always reports the same one.

use axum::http::HeaderMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::DeliveryId;

use super::signature::verify_signature;

/// Header name for the HMAC-SHA1 signature.
pub const HEADER_SIGNATURE: &str = "x-hub-signature";
/// Header name for the GitHub event type.
pub const HEADER_EVENT: &str = "x-github-event";
/// Header name for the GitHub delivery ID.
pub const HEADER_DELIVERY: &str = "x-github-delivery";

/// The first check a delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Must provide a 'GITHUB_WEBHOOK_SECRET' env variable")]
    MissingSecret,

    #[error("No X-Hub-Signature found on request")]
    MissingSignature,

    #[error("No X-Github-Event found on request")]
    MissingEventType,

    #[error("No X-Github-Delivery found on request")]
    MissingDelivery,

    #[error("X-Hub-Signature incorrect. Github webhook token doesn't match")]
    SignatureMismatch,
}

/// Headers extracted from a delivery that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDelivery {
    pub event_type: String,
    pub delivery_id: DeliveryId,
}

/// Verifies inbound webhook deliveries against a shared secret.
#[derive(Clone)]
pub struct WebhookValidator {
    secret: Option<String>,
}

impl WebhookValidator {
    /// Creates a validator. An empty secret is treated as missing.
    pub fn new(secret: Option<String>) -> Self {
        WebhookValidator {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Returns true if a secret is configured.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Runs the checks in order:
    ///
    /// 1. a secret is configured
    /// 2. `X-Hub-Signature` is present
    /// 3. `X-GitHub-Event` is present
    /// 4. `X-GitHub-Delivery` is present
    /// 5. the signature matches `sha1=` + hex HMAC-SHA1 of `raw_body`
    ///
    /// `raw_body` must be the bytes exactly as received.
    pub fn validate(
        &self,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> Result<ValidatedDelivery, ValidationError> {
        let result = self.run_checks(headers, raw_body);
        match &result {
            Ok(delivery) => debug!(
                delivery_id = %delivery.delivery_id,
                event_type = %delivery.event_type,
                "Webhook delivery validated"
            ),
            Err(e) => warn!(error = %e, "Webhook delivery rejected"),
        }
        result
    }

    fn run_checks(
        &self,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> Result<ValidatedDelivery, ValidationError> {
        let secret = self.secret.as_deref().ok_or(ValidationError::MissingSecret)?;
        let signature =
            header_str(headers, HEADER_SIGNATURE).ok_or(ValidationError::MissingSignature)?;
        let event_type =
            header_str(headers, HEADER_EVENT).ok_or(ValidationError::MissingEventType)?;
        let delivery_id =
            header_str(headers, HEADER_DELIVERY).ok_or(ValidationError::MissingDelivery)?;

        if !verify_signature(raw_body, signature, secret.as_bytes()) {
            return Err(ValidationError::SignatureMismatch);
        }

        Ok(ValidatedDelivery {
            event_type: event_type.to_string(),
            delivery_id: DeliveryId::new(delivery_id),
        })
    }
}

impl std::fmt::Debug for WebhookValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookValidator")
            .field("has_secret", &self.has_secret())
            .finish()
    }
}

/// Returns a non-empty UTF-8 header value.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}
