//! GitHub API error types.
//!
//! Status updates are best-effort, so errors are only categorized for
//! logging: a **transient** failure (5xx, rate limit, network) may succeed if
//! the same status is published again, a **permanent** one (most 4xx, no
//! token) will not.

use std::fmt;

use thiserror::Error;

/// The kind of GitHub API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    Transient,
    Permanent,
}

impl fmt::Display for GitHubErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitHubErrorKind::Transient => f.write_str("transient"),
            GitHubErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// A GitHub API error with its category.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if the request got a response.
    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    /// Creates a permanent error without an octocrab source.
    pub fn permanent(message: impl Into<String>) -> Self {
        GitHubApiError {
            kind: GitHubErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an octocrab error.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = status_code(&err);
        let message = match &err {
            octocrab::Error::GitHub { source, .. } => source.message.clone(),
            other => other.to_string(),
        };
        GitHubApiError {
            kind: categorize(status_code, &message),
            status_code,
            message,
            source: Some(err),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == GitHubErrorKind::Transient
    }
}

fn status_code(err: &octocrab::Error) -> Option<u16> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
        _ => None,
    }
}

fn categorize(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    match status_code {
        Some(429) => GitHubErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => GitHubErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
        Some(_) => GitHubErrorKind::Permanent,
        None if is_network_error(message) => GitHubErrorKind::Transient,
        None => GitHubErrorKind::Permanent,
    }
}

fn is_rate_limit_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("rate limit") || message.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let message = message.to_lowercase();
    ["timeout", "timed out", "connection", "network", "dns"]
        .iter()
        .any(|needle| message.contains(needle))
}
