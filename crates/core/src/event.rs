//! Loop event system: observe runs without polling.
//!
//! The Engine, Heartbeat and team runtime publish events when something
//! interesting happens. Embedding applications subscribe to react.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::plan::StepStatus;
use crate::state::{LoopStatus, Phase};

/// All loop events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoopEvent {
    /// A run entered a phase
    PhaseEntered {
        run_id: String,
        phase: Phase,
        timestamp: DateTime<Utc>,
    },

    /// A plan step reached a terminal status
    StepFinished {
        run_id: String,
        step_id: String,
        status: StepStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A run returned its result
    RunFinished {
        run_id: String,
        status: LoopStatus,
        goal_met: bool,
        timestamp: DateTime<Utc>,
    },

    /// A heartbeat cycle completed (or was skipped)
    HeartbeatCycle {
        checks_run: usize,
        runs_triggered: usize,
        skipped: bool,
        timestamp: DateTime<Utc>,
    },

    /// A mailbox message was delivered
    MessageDelivered {
        from: String,
        to: String,
        kind: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for loop events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<LoopEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: LoopEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LoopEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(LoopEvent::StepFinished {
            run_id: "r1".into(),
            step_id: "step-1".into(),
            status: StepStatus::Completed,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            LoopEvent::StepFinished { step_id, status, .. } => {
                assert_eq!(step_id, "step-1");
                assert_eq!(*status, StepStatus::Completed);
            }
            _ => panic!("Expected StepFinished event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(LoopEvent::RunFinished {
            run_id: "r1".into(),
            status: LoopStatus::Failed,
            goal_met: false,
            timestamp: Utc::now(),
        });
    }
}
