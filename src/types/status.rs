//! Task status records published for the source-control platform.
//!
//! A [`Status`] is the unit that travels through the work queue. Its JSON
//! shape matches what the status consumer (and GitHub's commit status API)
//! expects: `owner`, `repo`, `sha`, `number`, `state`, `target_url`,
//! `description`, `context`, plus an `eventData` reference used for routing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::EventId;
use crate::webhooks::events::EventData;

/// Owner used when the payload has no `repository.owner.login`.
pub const DEFAULT_OWNER: &str = "Default_Owner";

/// Repository used when the payload has no `repository.name`.
pub const DEFAULT_REPOSITORY: &str = "Default_Repository";

/// Commit reference used when the payload has no `pull_request.head.sha`.
pub const MISSING_SHA: &str = "Missing SHA";

/// Target URL used when a status carries no link of its own.
pub const DEFAULT_TARGET_URL: &str = "https://github.com/zotoio/github-task-manager";

/// State of a task as reported to GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Success,
    Error,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Success => "success",
            TaskState::Error => "error",
        }
    }

    /// Returns true for `success` and `error`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The slice of the originating event a consumer needs to route an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    #[serde(rename = "ghEventId")]
    pub event_id: EventId,

    #[serde(rename = "ghEventType")]
    pub event_type: String,
}

/// A reported task state plus the display metadata GitHub needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub owner: String,
    pub repo: String,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    pub state: TaskState,
    pub target_url: String,
    pub description: String,
    pub context: String,
    #[serde(rename = "eventData")]
    pub event_ref: EventRef,
}

impl Status {
    /// Builds a status for a pull-request event.
    ///
    /// Never fails: fields missing from the payload fall back to
    /// [`DEFAULT_OWNER`], [`DEFAULT_REPOSITORY`] and [`MISSING_SHA`], and a
    /// missing `url` falls back to [`DEFAULT_TARGET_URL`].
    pub fn for_pull_request(
        event: &EventData,
        state: TaskState,
        context: impl Into<String>,
        description: impl Into<String>,
        url: Option<&str>,
    ) -> Self {
        let payload = &event.payload;
        Status {
            owner: non_empty_str(payload, "/repository/owner/login")
                .unwrap_or(DEFAULT_OWNER)
                .to_string(),
            repo: non_empty_str(payload, "/repository/name")
                .unwrap_or(DEFAULT_REPOSITORY)
                .to_string(),
            sha: non_empty_str(payload, "/pull_request/head/sha")
                .unwrap_or(MISSING_SHA)
                .to_string(),
            number: payload
                .pointer("/pull_request/number")
                .and_then(Value::as_u64),
            state,
            target_url: url
                .filter(|u| !u.is_empty())
                .unwrap_or(DEFAULT_TARGET_URL)
                .to_string(),
            description: description.into(),
            context: context.into(),
            event_ref: EventRef {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
            },
        }
    }
}

/// Looks up a string at a JSON pointer, treating `""` as absent.
pub(crate) fn non_empty_str<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(payload: Value) -> EventData {
        EventData::new(EventId::new("evt-1"), "pull_request", payload)
    }

    #[test]
    fn populates_from_payload() {
        let event = event(json!({
            "repository": { "name": "hello-world", "owner": { "login": "octocat" } },
            "pull_request": { "number": 7, "head": { "sha": "abc123" } }
        }));

        let status = Status::for_pull_request(
            &event,
            TaskState::Success,
            "lint: style",
            "ok",
            Some("https://ci.example/1"),
        );

        assert_eq!(status.owner, "octocat");
        assert_eq!(status.repo, "hello-world");
        assert_eq!(status.sha, "abc123");
        assert_eq!(status.number, Some(7));
        assert_eq!(status.target_url, "https://ci.example/1");
        assert_eq!(status.event_ref.event_id, EventId::new("evt-1"));
    }

    #[test]
    fn missing_head_sha_uses_sentinel() {
        let event = event(json!({
            "repository": { "name": "hello-world", "owner": { "login": "octocat" } },
            "pull_request": { "number": 7 }
        }));

        let status = Status::for_pull_request(&event, TaskState::Pending, "c", "d", None);
        assert_eq!(status.sha, MISSING_SHA);
        assert_eq!(status.target_url, DEFAULT_TARGET_URL);
    }

    #[test]
    fn empty_payload_uses_all_sentinels() {
        let status =
            Status::for_pull_request(&event(json!({})), TaskState::Error, "c", "d", Some(""));
        assert_eq!(status.owner, DEFAULT_OWNER);
        assert_eq!(status.repo, DEFAULT_REPOSITORY);
        assert_eq!(status.sha, MISSING_SHA);
        assert_eq!(status.number, None);
        assert_eq!(status.target_url, DEFAULT_TARGET_URL);
    }

    #[test]
    fn serializes_with_consumer_field_names() {
        let status = Status::for_pull_request(&event(json!({})), TaskState::Pending, "c", "d", None);
        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["state"], json!("pending"));
        assert_eq!(value["eventData"]["ghEventId"], json!("evt-1"));
        assert_eq!(value["eventData"]["ghEventType"], json!("pull_request"));
        assert!(value.get("number").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Error.is_terminal());
    }
}
