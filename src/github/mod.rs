//! GitHub API access for the status consumer.
//!
//! [`OctocrabUpdater`] implements [`crate::consumer::GitHubUpdater`] over the
//! REST API; [`GitHubApiError`] separates transient from permanent failures
//! for logging.

mod client;
mod error;

pub use client::OctocrabUpdater;
pub use error::{GitHubApiError, GitHubErrorKind};
