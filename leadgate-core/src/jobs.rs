//! Durable downstream jobs.
//!
//! The handler stages jobs while a message is processed and flushes them to
//! the shared store's lists after the outer transaction commits. Consumers
//! are at-least-once: a job is only removed from its list after handling
//! (or after a retry is scheduled), so downstream workers must tolerate
//! redelivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::kv::{KvError, KvStore};
use crate::lead::{FormFields, Transport};
use crate::state::LeadState;

/// List key for spreadsheet row sync jobs.
pub const QUEUE_SPREADSHEET_SYNC: &str = "queue:spreadsheet-sync";

/// List key for operator notification jobs.
pub const QUEUE_OPERATOR_NOTIFY: &str = "queue:operator-notify";

/// How often an idle worker re-checks its list.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors surfaced by job processing.
#[derive(Debug, Error)]
pub enum JobError {
    /// The handler could not process the payload; the job is retryable.
    #[error("job failed: {0}")]
    Failed(String),

    /// The payload could not be decoded; the job is dropped.
    #[error("malformed job payload: {0}")]
    Malformed(String),
}

/// Retry policy for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts before a job is dropped.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy for spreadsheet-sync jobs.
    pub fn spreadsheet(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Policy for operator-notify jobs.
    pub fn notify(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Exponential backoff before retrying after attempt `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// A captured lead row bound for the spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadsheetSyncJob {
    /// Lead the row belongs to.
    pub lead_id: Uuid,
    /// Normalized user id.
    pub user_id: String,
    /// Transport the lead arrived on.
    pub transport: Transport,
    /// The completed form.
    pub form: FormFields,
}

/// Category of an operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A conversation was handed to an operator.
    Escalation,
    /// A new lead entered the funnel.
    NewLead,
    /// A lead completed the qualification form.
    FormCompleted,
    /// A lead chose the partnership option.
    PartnershipInterest,
    /// A lead chose the other-needs option.
    OtherNeeds,
    /// Anything else worth an operator's eyes.
    GeneralInquiry,
}

/// An operator notification job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorNotifyJob {
    /// Notification category.
    pub kind: NotificationKind,
    /// Category-specific payload.
    pub data: serde_json::Value,
}

/// Context attached to escalation notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationData {
    /// Normalized user id.
    pub user_id: String,
    /// The message that triggered the escalation.
    pub last_message: String,
    /// Lead state at escalation time.
    pub current_state: LeadState,
    /// Warning strikes accumulated.
    pub warning_count: u32,
    /// Transport the lead arrived on.
    pub transport: Transport,
    /// Why the conversation was escalated.
    pub reason: String,
    /// When the escalation happened.
    pub timestamp: DateTime<Utc>,
}

/// Wire envelope stored on a queue list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Unique job id, for worker idempotency.
    pub id: Uuid,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    /// The job payload.
    pub payload: serde_json::Value,
}

/// A job staged during message processing, flushed after commit.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingJob {
    /// Bound for [`QUEUE_SPREADSHEET_SYNC`].
    SpreadsheetSync(SpreadsheetSyncJob),
    /// Bound for [`QUEUE_OPERATOR_NOTIFY`].
    OperatorNotify(OperatorNotifyJob),
}

/// Enqueues jobs onto the shared store's lists.
pub struct JobDispatcher {
    kv: Arc<dyn KvStore>,
}

impl JobDispatcher {
    /// Create a dispatcher over the shared store.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn enqueue(&self, queue: &str, payload: serde_json::Value) -> Result<(), KvError> {
        let envelope = JobEnvelope {
            id: Uuid::now_v7(),
            attempt: 1,
            payload,
        };
        let raw = serde_json::to_string(&envelope)
            .map_err(|e| KvError::Backend(format!("encode job: {}", e)))?;
        self.kv.list_push(queue, &raw).await
    }

    /// Flush staged jobs. Called after the outer transaction commits; a
    /// failed push is logged and dropped rather than failing the message.
    pub async fn flush(&self, jobs: Vec<PendingJob>) {
        for job in jobs {
            let (queue, payload) = match &job {
                PendingJob::SpreadsheetSync(job) => {
                    (QUEUE_SPREADSHEET_SYNC, serde_json::to_value(job))
                }
                PendingJob::OperatorNotify(job) => {
                    (QUEUE_OPERATOR_NOTIFY, serde_json::to_value(job))
                }
            };
            let payload = match payload {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("failed to encode job for {}: {}", queue, e);
                    continue;
                }
            };
            if let Err(e) = self.enqueue(queue, payload).await {
                tracing::error!("failed to enqueue job on {}: {}", queue, e);
            }
        }
    }
}

/// Processes one decoded job payload.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handle a payload.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Failed`] to request a retry (until the policy's
    /// attempts are exhausted); [`JobError::Malformed`] drops the job.
    async fn handle(&self, payload: &serde_json::Value) -> Result<(), JobError>;
}

/// Polling consumer for one queue.
///
/// Jobs are removed from the list only after handling or after a retry is
/// scheduled, so a crash mid-job redelivers it.
pub struct JobWorker {
    kv: Arc<dyn KvStore>,
    queue: &'static str,
    policy: RetryPolicy,
    handler: Arc<dyn JobHandler>,
}

impl JobWorker {
    /// Create a worker for `queue`.
    pub fn new(
        kv: Arc<dyn KvStore>,
        queue: &'static str,
        policy: RetryPolicy,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            kv,
            queue,
            policy,
            handler,
        }
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("worker started for {}", self.queue);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.step().await {
                Ok(true) => {} // Processed a job; poll again immediately.
                Ok(false) => {
                    // Idle; wait for work or shutdown.
                    let sleep = tokio::time::sleep(POLL_INTERVAL);
                    tokio::select! {
                        _ = sleep => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("worker poll failed for {}: {}", self.queue, e);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
        tracing::info!("worker stopped for {}", self.queue);
    }

    /// Process at most one job. Returns whether a job was taken.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] when the queue itself is unreachable.
    pub async fn step(&self) -> Result<bool, KvError> {
        let head = self.kv.list_range(self.queue, 0, 0).await?;
        let Some(raw) = head.into_iter().next() else {
            return Ok(false);
        };

        let envelope: JobEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!("dropping malformed job on {}: {}", self.queue, e);
                self.kv.list_delete(self.queue, &raw).await?;
                return Ok(true);
            }
        };

        match self.handler.handle(&envelope.payload).await {
            Ok(()) => {
                tracing::debug!("job {} done on {}", envelope.id, self.queue);
            }
            Err(JobError::Malformed(e)) => {
                tracing::error!("dropping job {} on {}: {}", envelope.id, self.queue, e);
            }
            Err(JobError::Failed(e)) if envelope.attempt < self.policy.max_attempts => {
                let delay = self.policy.delay_after(envelope.attempt);
                tracing::warn!(
                    "job {} attempt {}/{} failed on {}: {}; retrying in {:?}",
                    envelope.id,
                    envelope.attempt,
                    self.policy.max_attempts,
                    self.queue,
                    e,
                    delay
                );
                self.schedule_retry(envelope, delay);
            }
            Err(JobError::Failed(e)) => {
                tracing::error!(
                    "job {} exhausted {} attempts on {}: {}",
                    envelope.id,
                    self.policy.max_attempts,
                    self.queue,
                    e
                );
            }
        }

        self.kv.list_delete(self.queue, &raw).await?;
        Ok(true)
    }

    /// Re-push a bumped envelope after the backoff delay, off the poll loop.
    fn schedule_retry(&self, mut envelope: JobEnvelope, delay: Duration) {
        envelope.attempt += 1;
        let kv = Arc::clone(&self.kv);
        let queue = self.queue;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match serde_json::to_string(&envelope) {
                Ok(raw) => {
                    if let Err(e) = kv.list_push(queue, &raw).await {
                        tracing::error!("failed to requeue job {} on {}: {}", envelope.id, queue, e);
                    }
                }
                Err(e) => tracing::error!("failed to encode retry for {}: {}", queue, e),
            }
        });
    }
}
