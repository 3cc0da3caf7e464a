//! Webhook handling for GitHub events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA1)
//! - Ordered authenticity checks gating all downstream processing
//! - The [`Event`] type built from a validated delivery

pub mod events;
pub mod signature;
pub mod validator;

pub use events::{Event, EventData, MessageHandle};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, sign_request_body,
    verify_signature,
};
pub use validator::{ValidatedDelivery, ValidationError, WebhookValidator};
