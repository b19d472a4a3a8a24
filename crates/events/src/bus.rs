//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`FleetEvent`]s to every subscriber. It is shared
//! via `Arc<EventBus>` between the worker registry, the dispatcher and
//! whatever presentation adapter is listening.

use fleetcrypt_core::types::{JobOutcome, WorkerId, WorkerStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Identifier of a single job round trip.
pub type JobId = uuid::Uuid;

// ---------------------------------------------------------------------------
// FleetEvent
// ---------------------------------------------------------------------------

/// Outbound message to the presentation layer.
///
/// Events of one process stream arrive in order; events of different
/// processes interleave arbitrarily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    WorkerStarted {
        id: WorkerId,
        address: String,
        status: WorkerStatus,
    },
    /// One line of a worker's stdout.
    WorkerOutput { id: WorkerId, text: String },
    /// One line of a worker's stderr.
    WorkerError { id: WorkerId, text: String },
    WorkerStopping { id: WorkerId },
    /// The worker process exited. `code` is `None` when killed by a signal.
    WorkerStopped { id: WorkerId, code: Option<i32> },

    JobOutput { job_id: JobId, text: String },
    JobWarning { job_id: JobId, text: String },
    JobError { job_id: JobId, text: String },
    /// Always the last event of a job.
    JobCompleted {
        job_id: JobId,
        code: i32,
        outcome: JobOutcome,
        /// Set when the artifact is a placeholder copy, not a decryption.
        degraded: bool,
    },
}

impl FleetEvent {
    /// Event name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetEvent::WorkerStarted { .. } => "worker_started",
            FleetEvent::WorkerOutput { .. } => "worker_output",
            FleetEvent::WorkerError { .. } => "worker_error",
            FleetEvent::WorkerStopping { .. } => "worker_stopping",
            FleetEvent::WorkerStopped { .. } => "worker_stopped",
            FleetEvent::JobOutput { .. } => "job_output",
            FleetEvent::JobWarning { .. } => "job_warning",
            FleetEvent::JobError { .. } => "job_error",
            FleetEvent::JobCompleted { .. } => "job_completed",
        }
    }

    /// The job this event belongs to, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            FleetEvent::JobOutput { job_id, .. }
            | FleetEvent::JobWarning { job_id, .. }
            | FleetEvent::JobError { job_id, .. }
            | FleetEvent::JobCompleted { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// The worker this event belongs to, if any.
    pub fn worker_id(&self) -> Option<WorkerId> {
        match self {
            FleetEvent::WorkerStarted { id, .. }
            | FleetEvent::WorkerOutput { id, .. }
            | FleetEvent::WorkerError { id, .. }
            | FleetEvent::WorkerStopping { id }
            | FleetEvent::WorkerStopped { id, .. } => Some(*id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use fleetcrypt_events::bus::{EventBus, FleetEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(FleetEvent::WorkerStopping { id: 0 });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: FleetEvent) {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(FleetEvent::WorkerOutput {
            id: 3,
            text: "listening".into(),
        });

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(
            received,
            FleetEvent::WorkerOutput {
                id: 3,
                text: "listening".into()
            }
        );
        assert_eq!(received.worker_id(), Some(3));
        assert_eq!(received.job_id(), None);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(FleetEvent::WorkerStopping { id: 1 });

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1, e2);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(FleetEvent::WorkerStopped { id: 0, code: None });
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(FleetEvent::WorkerStopping { id: 9 });
        assert_eq!(rx.try_recv().unwrap(), FleetEvent::WorkerStopping { id: 9 });
    }

    #[test]
    fn completed_event_serializes_with_type_tag() {
        let job_id = uuid::Uuid::nil();
        let event = FleetEvent::JobCompleted {
            job_id,
            code: 2,
            outcome: JobOutcome::Degraded,
            degraded: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_completed");
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["code"], 2);
        assert_eq!(json["outcome"], "degraded");
        assert_eq!(json["degraded"], true);
        assert_eq!(json["job_id"], job_id.to_string());
    }

    #[test]
    fn worker_started_round_trips_status() {
        let event = FleetEvent::WorkerStarted {
            id: 0,
            address: "localhost:50051".into(),
            status: WorkerStatus::Running,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        let back: FleetEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
