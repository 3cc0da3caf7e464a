//! Turning queued statuses into GitHub API updates.
//!
//! Planning is pure: [`plan_update`] maps a [`Status`] to the
//! [`GitHubUpdate`] that reports it (or to nothing), and a [`GitHubUpdater`]
//! performs it.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::github::GitHubApiError;
use crate::types::{Status, TaskState};

/// Status context that asks for a PR review comment instead of a commit status.
pub const COMMENT_ONLY_CONTEXT: &str = "COMMENT_ONLY";

/// GitHub rejects commit status descriptions longer than this.
pub const MAX_STATUS_DESCRIPTION: usize = 140;

/// Review event used for comment-only results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    Comment,
}

/// A write against the GitHub API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubUpdate {
    /// `POST /repos/{owner}/{repo}/statuses/{sha}`.
    CreateStatus {
        owner: String,
        repo: String,
        sha: String,
        state: TaskState,
        target_url: String,
        description: String,
        context: String,
    },

    /// `POST /repos/{owner}/{repo}/pulls/{number}/reviews`.
    CreateReview {
        owner: String,
        repo: String,
        number: u64,
        body: String,
        event: ReviewEvent,
    },
}

impl GitHubUpdate {
    /// The status context the update is made for; selects the API token.
    pub fn context(&self) -> &str {
        match self {
            GitHubUpdate::CreateStatus { context, .. } => context,
            GitHubUpdate::CreateReview { .. } => COMMENT_ONLY_CONTEXT,
        }
    }
}

/// Performs GitHub updates.
#[async_trait]
pub trait GitHubUpdater: Send + Sync {
    async fn apply(&self, update: &GitHubUpdate) -> Result<(), GitHubApiError>;
}

/// Decides how a status is reported to GitHub.
///
/// Only statuses from `pull_request` events are reported. Returns `None` for
/// any other event type, and for comment-only statuses without a PR number.
pub fn plan_update(status: &Status) -> Option<GitHubUpdate> {
    let event_type = status.event_ref.event_type.as_str();
    if event_type != "pull_request" {
        debug!(event_type, "No GitHub update for event type");
        return None;
    }

    if status.context == COMMENT_ONLY_CONTEXT {
        let Some(number) = status.number else {
            warn!(
                event_id = %status.event_ref.event_id,
                "Comment-only status has no pull request number"
            );
            return None;
        };
        return Some(GitHubUpdate::CreateReview {
            owner: status.owner.clone(),
            repo: status.repo.clone(),
            number,
            body: status.description.clone(),
            event: ReviewEvent::Comment,
        });
    }

    Some(GitHubUpdate::CreateStatus {
        owner: status.owner.clone(),
        repo: status.repo.clone(),
        sha: status.sha.clone(),
        state: status.state,
        target_url: status.target_url.clone(),
        description: truncate_chars(&status.description, MAX_STATUS_DESCRIPTION),
        context: status.context.clone(),
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
