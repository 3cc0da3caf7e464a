//! gtm-agent - A GitHub webhook agent that runs configured task trees for
//! pull requests and reports each result back as a commit status.
//!
//! Deliveries enter through [`server`], are authenticated by
//! [`webhooks::WebhookValidator`], dispatched by [`handlers::EventRouter`] and
//! evaluated by [`orchestrator::TaskOrchestrator`]. Statuses leave through
//! [`publisher::ResultPublisher`] and reach GitHub via [`consumer`].

pub mod config;
pub mod consumer;
pub mod executor;
pub mod github;
pub mod handlers;
pub mod orchestrator;
pub mod publisher;
pub mod registry;
pub mod server;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
