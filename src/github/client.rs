//! Octocrab-backed [`GitHubUpdater`].
//!
//! Each update is sent with the token configured for its status context
//! (`GTM_GITHUB_TOKEN_<CONTEXT>`, else `GTM_GITHUB_TOKEN`). Clients are built
//! lazily per token and reused.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::GitHubConfig;
use crate::consumer::{GitHubUpdate, GitHubUpdater, ReviewEvent};
use crate::types::TaskState;

use super::error::GitHubApiError;

#[derive(Serialize)]
struct CreateStatusRequest<'a> {
    state: TaskState,
    target_url: &'a str,
    description: &'a str,
    context: &'a str,
}

#[derive(Serialize)]
struct CreateReviewRequest<'a> {
    body: &'a str,
    event: ReviewEvent,
}

/// Applies updates through the GitHub REST API.
pub struct OctocrabUpdater {
    config: GitHubConfig,
    clients: Mutex<HashMap<String, Octocrab>>,
}

impl OctocrabUpdater {
    pub fn new(config: GitHubConfig) -> Self {
        if config.proxy.is_some() {
            warn!("GTM_GITHUB_PROXY is set but proxying is not supported; connecting directly");
        }
        if !config.reject_unauthorized {
            warn!(
                "GTM_TLS_REJECT_UNAUTHORIZED=false is not supported; certificates are still verified"
            );
        }
        OctocrabUpdater {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Token for an update's context. Status contexts look like
    /// `"<executor>: <context>"`; the task context after the separator selects
    /// the token.
    fn token_for(&self, context: &str) -> Option<&str> {
        let task_context = context
            .split_once(": ")
            .map_or(context, |(_, task_context)| task_context);
        self.config.token_for_context(task_context)
    }

    fn client_for(&self, context: &str) -> Result<Octocrab, GitHubApiError> {
        let token = self.token_for(context).ok_or_else(|| {
            GitHubApiError::permanent(format!("no GitHub token configured for context '{context}'"))
        })?;

        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(token) {
            return Ok(client.clone());
        }

        let client = Octocrab::builder()
            .base_uri(self.config.base_uri())
            .map_err(GitHubApiError::from_octocrab)?
            .personal_token(token.to_string())
            .set_connect_timeout(Some(self.config.timeout))
            .set_read_timeout(Some(self.config.timeout))
            .build()
            .map_err(GitHubApiError::from_octocrab)?;

        clients.insert(token.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl GitHubUpdater for OctocrabUpdater {
    #[instrument(skip_all, fields(context = %update.context()))]
    async fn apply(&self, update: &GitHubUpdate) -> Result<(), GitHubApiError> {
        let client = self.client_for(update.context())?;

        match update {
            GitHubUpdate::CreateStatus {
                owner,
                repo,
                sha,
                state,
                target_url,
                description,
                context,
            } => {
                let url = format!("/repos/{}/{}/statuses/{}", owner, repo, sha);
                let request = CreateStatusRequest {
                    state: *state,
                    target_url,
                    description,
                    context,
                };
                let _: serde_json::Value = client
                    .post(&url, Some(&request))
                    .await
                    .map_err(GitHubApiError::from_octocrab)?;
                debug!(%owner, %repo, %sha, %state, "Created commit status");
            }
            GitHubUpdate::CreateReview {
                owner,
                repo,
                number,
                body,
                event,
            } => {
                let url = format!("/repos/{}/{}/pulls/{}/reviews", owner, repo, number);
                let request = CreateReviewRequest {
                    body,
                    event: *event,
                };
                let _: serde_json::Value = client
                    .post(&url, Some(&request))
                    .await
                    .map_err(GitHubApiError::from_octocrab)?;
                debug!(%owner, %repo, number, "Created review comment");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for OctocrabUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabUpdater")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
