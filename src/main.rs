use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gtm_agent::config::Config;
use gtm_agent::consumer::StatusConsumer;
use gtm_agent::executor::{executor_registry, unregistered_executors};
use gtm_agent::github::OctocrabUpdater;
use gtm_agent::handlers::{EventRouter, default_handler_registry};
use gtm_agent::orchestrator::TaskOrchestrator;
use gtm_agent::publisher::{MemoryTopics, PublishTargets, ResultPublisher, SpoolQueue};
use gtm_agent::server::{AppState, build_router};
use gtm_agent::types::TaskConfig;
use gtm_agent::webhooks::WebhookValidator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gtm_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(?config, "Loaded configuration");

    let task_config = match &config.task_config_path {
        Some(path) => TaskConfig::load(path)
            .with_context(|| format!("failed to load task config {}", path.display()))?,
        None => {
            warn!("GTM_TASK_CONFIG not set; no tasks will run");
            TaskConfig::new()
        }
    };

    if config.webhook_secret.is_none() {
        warn!("GTM_GITHUB_WEBHOOK_SECRET not set; every delivery will be rejected");
    }

    let queue = Arc::new(SpoolQueue::new(&config.queue_dir));
    queue
        .create_queue(&config.results_queue)
        .context("failed to create results queue")?;
    let topics = Arc::new(MemoryTopics::new());

    let publisher = ResultPublisher::new(queue.clone(), topics.clone());
    let executors = executor_registry();
    info!(
        namespace = executors.namespace(),
        registered = ?executors.names(),
        "Executor registry ready"
    );
    for executor in unregistered_executors(&executors, &task_config) {
        warn!(executor, "Configured tasks name an executor that is not registered; they will report Unknown Executor");
    }

    let orchestrator = Arc::new(TaskOrchestrator::new(
        Arc::new(executors),
        publisher,
        PublishTargets::new(&config.results_queue, &config.results_topic),
    ));
    let router = EventRouter::new(Arc::new(default_handler_registry(orchestrator)));

    let shutdown = CancellationToken::new();
    let consumer = StatusConsumer::new(
        queue,
        &config.results_queue,
        Arc::new(OctocrabUpdater::new(config.github.clone())),
    );
    let announcements = topics.subscribe(&config.results_topic);
    let consumer_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { consumer.run(announcements, shutdown).await }
    });

    let app_state = AppState::new(
        WebhookValidator::new(config.webhook_secret.clone()),
        router,
        Arc::new(task_config),
    );
    let app = build_router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await
        .context("server error")?;

    info!("Waiting for in-flight events");
    app_state.tasks().close();
    app_state.tasks().wait().await;

    shutdown.cancel();
    consumer_task.await.context("status consumer panicked")?;
    info!("Shut down");
    Ok(())
}
