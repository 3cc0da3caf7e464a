//! HTTP server for the task agent.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries (returns 202 Accepted)
//! - `GET /health` - Returns 200 if server is running
//!
//! Accepted deliveries are routed on a spawned task tracked by
//! [`AppState::tasks`], so shutdown can wait for in-flight orchestrations.

use std::sync::Arc;

use axum::http::StatusCode;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

pub mod webhook;

pub use webhook::{WebhookError, webhook_handler};

use crate::handlers::EventRouter;
use crate::types::TaskConfig;
use crate::webhooks::WebhookValidator;

/// Shared application state, passed to handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    validator: WebhookValidator,
    router: EventRouter,
    task_config: Arc<TaskConfig>,
    tasks: TaskTracker,
}

impl AppState {
    pub fn new(validator: WebhookValidator, router: EventRouter, task_config: Arc<TaskConfig>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                validator,
                router,
                task_config,
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn validator(&self) -> &WebhookValidator {
        &self.inner.validator
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// The task configuration attached to every new event.
    pub fn task_config(&self) -> Arc<TaskConfig> {
        Arc::clone(&self.inner.task_config)
    }

    /// Tracker for spawned event routing.
    pub fn tasks(&self) -> &TaskTracker {
        &self.inner.tasks
    }
}

/// Liveness probe.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use tower::ServiceExt;

    use crate::handlers::default_handler_registry;
    use crate::test_utils::{
        Journal, RecordingTransport, pull_request_payload, recording_orchestrator,
        scripted_registry,
    };
    use crate::types::{Task, TaskState};
    use crate::webhooks::sign_request_body;
    use crate::webhooks::validator::{HEADER_DELIVERY, HEADER_EVENT, HEADER_SIGNATURE};

    const SECRET: &str = "test-secret";

    fn test_app_state(secret: Option<&str>) -> (AppState, Arc<RecordingTransport>) {
        let journal = Arc::new(Journal::default());
        let transport = Arc::new(RecordingTransport::new(journal.clone()));
        let executors = scripted_registry(["jenkins"], HashMap::new(), journal);
        let orchestrator = Arc::new(recording_orchestrator(executors, transport.clone()));
        let router = EventRouter::new(Arc::new(default_handler_registry(orchestrator)));
        let task_config = TaskConfig::new().with_tasks(
            "pull_request",
            vec![Task::new("jenkins", "build").with_parameter("job", "##GHREPONAME##")],
        );

        let state = AppState::new(
            WebhookValidator::new(secret.map(str::to_string)),
            router,
            Arc::new(task_config),
        );
        (state, transport)
    }

    fn webhook_request(
        signing_secret: &str,
        event_type: Option<&str>,
        body: &[u8],
    ) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header(HEADER_DELIVERY, "550e8400-e29b-41d4-a716-446655440000")
            .header(
                HEADER_SIGNATURE,
                sign_request_body(signing_secret.as_bytes(), body),
            );
        if let Some(event_type) = event_type {
            builder = builder.header(HEADER_EVENT, event_type);
        }
        builder.body(Body::from(body.to_vec())).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn settle(state: &AppState) {
        state.tasks().close();
        state.tasks().wait().await;
    }

    #[tokio::test]
    async fn health_returns_200() {
        let (state, _) = test_app_state(Some(SECRET));
        let app = build_router(state);

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn valid_pull_request_is_accepted_and_orchestrated() {
        let (state, transport) = test_app_state(Some(SECRET));
        let app = build_router(state.clone());
        let body = serde_json::to_vec(&pull_request_payload("opened")).unwrap();

        let response = app
            .oneshot(webhook_request(SECRET, Some("pull_request"), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        settle(&state).await;

        let states: Vec<TaskState> = transport.statuses().iter().map(|s| s.state).collect();
        assert_eq!(states, vec![TaskState::Pending, TaskState::Success]);
        assert_eq!(
            transport.statuses()[0].event_ref.event_id.as_str(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[tokio::test]
    async fn closed_pull_request_is_accepted_without_statuses() {
        let (state, transport) = test_app_state(Some(SECRET));
        let app = build_router(state.clone());
        let body = serde_json::to_vec(&pull_request_payload("closed")).unwrap();

        let response = app
            .oneshot(webhook_request(SECRET, Some("pull_request"), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        settle(&state).await;
        assert!(transport.statuses().is_empty());
    }

    #[tokio::test]
    async fn wrong_signature_returns_401() {
        let (state, transport) = test_app_state(Some(SECRET));
        let app = build_router(state.clone());
        let body = serde_json::to_vec(&pull_request_payload("opened")).unwrap();

        let response = app
            .oneshot(webhook_request("wrong-secret", Some("pull_request"), &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_text(response).await,
            "X-Hub-Signature incorrect. Github webhook token doesn't match"
        );
        settle(&state).await;
        assert!(transport.statuses().is_empty());
    }

    #[tokio::test]
    async fn missing_event_header_returns_400() {
        let (state, _) = test_app_state(Some(SECRET));
        let app = build_router(state);
        let body = serde_json::to_vec(&pull_request_payload("opened")).unwrap();

        let response = app
            .oneshot(webhook_request(SECRET, None, &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "No X-Github-Event found on request");
    }

    #[tokio::test]
    async fn missing_secret_returns_500() {
        let (state, _) = test_app_state(None);
        let app = build_router(state);
        let body = serde_json::to_vec(&pull_request_payload("opened")).unwrap();

        let response = app
            .oneshot(webhook_request(SECRET, Some("pull_request"), &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn invalid_json_returns_400() {
        let (state, _) = test_app_state(Some(SECRET));
        let app = build_router(state);

        let response = app
            .oneshot(webhook_request(SECRET, Some("pull_request"), b"{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unhandled_event_type_is_accepted() {
        let (state, transport) = test_app_state(Some(SECRET));
        let app = build_router(state.clone());
        let body = br#"{"ref":"refs/heads/main"}"#;

        let response = app
            .oneshot(webhook_request(SECRET, Some("push"), body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(state.tasks().is_empty(), "no routing task is spawned");
        settle(&state).await;
        assert!(transport.statuses().is_empty());
    }
}
