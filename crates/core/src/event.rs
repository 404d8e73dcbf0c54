//! Domain event system: the event-publishing channel.
//!
//! Controllers publish progressive updates (stage transitions, plan step
//! fields, tool executions) here. Delivery to a UI is somebody else's job;
//! subscribers simply receive every event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A controller entered a new stage
    StageEntered {
        run_id: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A streaming stage produced more text
    TextProduced {
        run_id: String,
        stage: String,
        delta: String,
        timestamp: DateTime<Utc>,
    },

    /// A plan step field became (partially) available
    PlanStepUpdated {
        run_id: String,
        step_index: usize,
        field: String,
        value: serde_json::Value,
        complete: bool,
        timestamp: DateTime<Utc>,
    },

    /// A plan step changed status
    StepStatusChanged {
        run_id: String,
        step_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// A plan has no step left to run
    PlanCompleted {
        run_id: String,
        plan_id: String,
        version: u32,
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        run_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A run reached its terminal state
    RunCompleted {
        run_id: String,
        answer_preview: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
