//! Status consumer: drains the results queue into GitHub.
//!
//! The orchestrator never talks to GitHub itself. It enqueues each status and
//! announces it on the results topic; [`StatusConsumer`] reacts to those
//! announcements by draining the queue, planning a [`GitHubUpdate`] per
//! status and applying it.
//!
//! Every received message is deleted once handled, whether or not GitHub
//! accepted the update. A status that cannot be delivered is logged and
//! dropped.

mod plan;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::publisher::{QueueReceiver, TransportError, WorkQueue};
use crate::types::Status;

pub use plan::{
    COMMENT_ONLY_CONTEXT, GitHubUpdate, GitHubUpdater, MAX_STATUS_DESCRIPTION, ReviewEvent,
    plan_update,
};

/// Messages read per receive call.
const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to resolve results queue: {0}")]
    QueueLookup(#[source] TransportError),

    #[error("failed to receive from results queue: {0}")]
    Receive(#[source] TransportError),

    #[error("failed to delete message from results queue: {0}")]
    Delete(#[source] TransportError),
}

/// Counts from one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub received: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub invalid: usize,
}

/// Applies queued statuses to GitHub.
pub struct StatusConsumer<Q> {
    queue: Arc<Q>,
    queue_name: String,
    updater: Arc<dyn GitHubUpdater>,
    batch_size: usize,
}

impl<Q> StatusConsumer<Q>
where
    Q: WorkQueue + QueueReceiver,
{
    pub fn new(queue: Arc<Q>, queue_name: impl Into<String>, updater: Arc<dyn GitHubUpdater>) -> Self {
        StatusConsumer {
            queue,
            queue_name: queue_name.into(),
            updater,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets how many messages are read per receive call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Handles every message currently on the queue.
    ///
    /// # Errors
    ///
    /// Fails only on queue errors. GitHub failures are counted in the report.
    #[instrument(skip(self), fields(queue = %self.queue_name))]
    pub async fn drain(&self) -> Result<DrainReport, ConsumerError> {
        let url = self
            .queue
            .queue_url(&self.queue_name)
            .await
            .map_err(ConsumerError::QueueLookup)?;

        let mut report = DrainReport::default();
        loop {
            let batch = self
                .queue
                .receive_messages(&url, self.batch_size)
                .await
                .map_err(ConsumerError::Receive)?;
            if batch.is_empty() {
                break;
            }

            for message in batch {
                report.received += 1;
                match serde_json::from_str::<Status>(&message.body) {
                    Ok(status) => self.handle_status(&status, &mut report).await,
                    Err(e) => {
                        warn!(message_id = %message.id, error = %e, "Dropping malformed status message");
                        report.invalid += 1;
                    }
                }
                self.queue
                    .delete_message(&url, &message.id)
                    .await
                    .map_err(ConsumerError::Delete)?;
            }
        }

        if report.received > 0 {
            info!(
                received = report.received,
                applied = report.applied,
                failed = report.failed,
                skipped = report.skipped,
                invalid = report.invalid,
                "Drained results queue"
            );
        }
        Ok(report)
    }

    async fn handle_status(&self, status: &Status, report: &mut DrainReport) {
        let Some(update) = plan_update(status) else {
            report.skipped += 1;
            return;
        };

        match self.updater.apply(&update).await {
            Ok(()) => {
                debug!(
                    event_id = %status.event_ref.event_id,
                    context = %status.context,
                    state = %status.state,
                    "Applied GitHub update"
                );
                report.applied += 1;
            }
            Err(e) => {
                error!(
                    event_id = %status.event_ref.event_id,
                    context = %status.context,
                    kind = %e.kind,
                    error = %e,
                    "GitHub update failed"
                );
                report.failed += 1;
            }
        }
    }

    /// Drains once, then again on every topic announcement, until `shutdown`
    /// fires or the topic closes.
    pub async fn run(
        &self,
        mut announcements: broadcast::Receiver<String>,
        shutdown: CancellationToken,
    ) {
        info!(queue = %self.queue_name, "Status consumer started");
        self.drain_logged().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = announcements.recv() => match received {
                    Ok(_) => self.drain_logged().await,
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Missed announcements; draining");
                        self.drain_logged().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!(queue = %self.queue_name, "Status consumer stopped");
    }

    async fn drain_logged(&self) {
        if let Err(e) = self.drain().await {
            error!(error = %e, "Failed to drain results queue");
        }
    }
}
