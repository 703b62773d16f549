//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. It is shared
//! via `Arc<EventBus>` between the scheduler and every listener. Delivery is
//! at-least-once to each subscriber for as long as it stays subscribed;
//! nothing is stored beyond the job's persisted status.

use chrono::{DateTime, Utc};
use manimai_core::failure::{FailureKind, JobFailure};
use manimai_core::types::DbId;
use manimai_db::models::segment::Segment;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    JobQueued,
    JobStarted,
    JobSucceeded { segment: Segment },
    JobFailed { reason: FailureKind, message: String },
    JobCancelled,
}

/// A lifecycle notification for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub workspace_id: DbId,
    pub job_id: DbId,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(workspace_id: DbId, job_id: DbId, kind: JobEventKind) -> Self {
        Self {
            workspace_id,
            job_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn queued(workspace_id: DbId, job_id: DbId) -> Self {
        Self::new(workspace_id, job_id, JobEventKind::JobQueued)
    }

    pub fn started(workspace_id: DbId, job_id: DbId) -> Self {
        Self::new(workspace_id, job_id, JobEventKind::JobStarted)
    }

    pub fn succeeded(segment: Segment) -> Self {
        Self::new(
            segment.workspace_id,
            segment.job_id,
            JobEventKind::JobSucceeded { segment },
        )
    }

    pub fn failed(workspace_id: DbId, job_id: DbId, failure: &JobFailure) -> Self {
        Self::new(
            workspace_id,
            job_id,
            JobEventKind::JobFailed {
                reason: failure.kind,
                message: failure.message.clone(),
            },
        )
    }

    pub fn cancelled(workspace_id: DbId, job_id: DbId) -> Self {
        Self::new(workspace_id, job_id, JobEventKind::JobCancelled)
    }

    /// Snake-case event name, as used in the serialized `type` field.
    pub fn name(&self) -> &'static str {
        match self.kind {
            JobEventKind::JobQueued => "job_queued",
            JobEventKind::JobStarted => "job_started",
            JobEventKind::JobSucceeded { .. } => "job_succeeded",
            JobEventKind::JobFailed { .. } => "job_failed",
            JobEventKind::JobCancelled => "job_cancelled",
        }
    }

    /// Whether this event reports a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            JobEventKind::JobSucceeded { .. } | JobEventKind::JobFailed { .. } | JobEventKind::JobCancelled
        )
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`JobEvent`].
///
/// # Usage
///
/// ```rust
/// use manimai_events::bus::{EventBus, JobEvent};
///
/// let bus = EventBus::default();
/// let mut stream = bus.subscribe(Some(1));
///
/// bus.publish(JobEvent::queued(1, 10));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: JobEvent) {
        tracing::debug!(
            workspace_id = event.workspace_id,
            job_id = event.job_id,
            event = event.name(),
            "Publishing job event",
        );
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events of one workspace, or of all workspaces for `None`.
    pub fn subscribe(&self, workspace_id: Option<DbId>) -> JobEventStream {
        JobEventStream {
            receiver: self.sender.subscribe(),
            workspace_id,
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// JobEventStream
// ---------------------------------------------------------------------------

/// One subscription to the bus. Dropping it unsubscribes.
pub struct JobEventStream {
    receiver: broadcast::Receiver<JobEvent>,
    workspace_id: Option<DbId>,
}

impl JobEventStream {
    /// Wait for the next matching event.
    ///
    /// A subscriber that falls behind the channel capacity skips the dropped
    /// events, logs a warning and keeps receiving. Returns `None` once the bus
    /// is gone.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        skipped,
                        workspace_id = ?self.workspace_id,
                        "Job event subscriber lagged",
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next matching event that is already buffered, if any.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        skipped,
                        workspace_id = ?self.workspace_id,
                        "Job event subscriber lagged",
                    );
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, event: &JobEvent) -> bool {
        self.workspace_id.map_or(true, |id| id == event.workspace_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
