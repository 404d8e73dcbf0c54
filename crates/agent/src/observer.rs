//! Run observers: per-stage callbacks attached through [`RunOptions`].
//!
//! Observers are invoked synchronously, in registration order, from the task
//! driving the run. A slow observer therefore slows the run; observers that
//! need to do real work should hand it off (see [`ChannelObserver`]).
//!
//! [`RunOptions`]: crate::RunOptions

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thinkloop_core::{DomainEvent, EventBus, Message, ToolCall, ToolResult};
use tokio::sync::mpsc;

use crate::orchestrator::Feedback;
use crate::plan::{Plan, StepStatus};
use crate::reasoning::ReasoningDecision;
use crate::stream_event::AgentStreamEvent;

/// A plan step field surfaced by the extractor while the plan is still
/// being generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFieldUpdate {
    /// Position of the step in the plan's `steps` array
    pub step_index: usize,
    /// `name`, `description`, `specialist` or `priority`
    pub field: String,
    /// The newly received text (string fields) or the whole value
    pub value: serde_json::Value,
    /// Whether the field is now fully received
    pub complete: bool,
}

/// Callbacks fired while a controller runs. Every method defaults to a no-op.
pub trait RunObserver: Send + Sync {
    /// A controller entered a stage.
    fn on_stage(&self, _stage: &str) {}

    /// A streaming generation produced more text.
    fn on_chunk(&self, _stage: &str, _delta: &str) {}

    /// The reasoning loop parsed a decision.
    fn on_thought(&self, _decision: &ReasoningDecision) {}

    /// A tool is about to be invoked.
    fn on_tool_call(&self, _call: &ToolCall) {}

    /// A tool returned after `elapsed`.
    fn on_tool_result(&self, _call: &ToolCall, _result: &ToolResult, _elapsed: Duration) {}

    /// A plan was created or revised.
    fn on_plan(&self, _plan: &Plan) {}

    /// A plan step field became (partially) available.
    fn on_step_field(&self, _update: &StepFieldUpdate) {}

    /// A plan step changed status.
    fn on_step_status(&self, _step_id: &str, _status: StepStatus) {}

    /// Plan execution found no step left to run.
    fn on_plan_complete(&self, _plan: &Plan) {}

    /// A round was evaluated.
    fn on_feedback(&self, _feedback: &Feedback) {}

    /// The run produced its final answer.
    fn on_complete(&self, _answer: &Message) {}
}

/// The observers of one run, in registration order.
#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<Arc<dyn RunObserver>>);

impl Observers {
    pub(crate) fn new(observers: &[Arc<dyn RunObserver>]) -> Self {
        Self(observers.to_vec())
    }

    pub(crate) fn notify(&self, f: impl Fn(&dyn RunObserver)) {
        for observer in &self.0 {
            f(observer.as_ref());
        }
    }

    /// Observers for a nested run (a specialist inside an orchestration).
    ///
    /// Nested runs forward text, thoughts and tool activity; their stage
    /// transitions and completion belong to the nested run only.
    pub(crate) fn nested(&self) -> Vec<Arc<dyn RunObserver>> {
        self.0
            .iter()
            .map(|inner| Arc::new(Nested(inner.clone())) as Arc<dyn RunObserver>)
            .collect()
    }
}

struct Nested(Arc<dyn RunObserver>);

impl RunObserver for Nested {
    fn on_chunk(&self, stage: &str, delta: &str) {
        self.0.on_chunk(stage, delta);
    }

    fn on_thought(&self, decision: &ReasoningDecision) {
        self.0.on_thought(decision);
    }

    fn on_tool_call(&self, call: &ToolCall) {
        self.0.on_tool_call(call);
    }

    fn on_tool_result(&self, call: &ToolCall, result: &ToolResult, elapsed: Duration) {
        self.0.on_tool_result(call, result, elapsed);
    }
}

/// Turns notifications into [`AgentStreamEvent`]s on a channel.
///
/// Backs the `stream` entry points. The channel is unbounded because
/// observers cannot await; a run produces a bounded number of events.
pub(crate) struct ChannelObserver {
    tx: mpsc::UnboundedSender<AgentStreamEvent>,
}

impl ChannelObserver {
    pub(crate) fn new(tx: mpsc::UnboundedSender<AgentStreamEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: AgentStreamEvent) {
        // The receiver may have been dropped; the run still finishes.
        let _ = self.tx.send(event);
    }
}

impl RunObserver for ChannelObserver {
    fn on_stage(&self, stage: &str) {
        self.send(AgentStreamEvent::Stage {
            stage: stage.to_string(),
        });
    }

    fn on_chunk(&self, stage: &str, delta: &str) {
        self.send(AgentStreamEvent::Chunk {
            stage: stage.to_string(),
            content: delta.to_string(),
        });
    }

    fn on_thought(&self, decision: &ReasoningDecision) {
        self.send(AgentStreamEvent::Thought {
            content: decision.thought.clone(),
            action: decision.action.as_str().to_string(),
            confidence: decision.confidence,
        });
    }

    fn on_tool_call(&self, call: &ToolCall) {
        self.send(AgentStreamEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        });
    }

    fn on_tool_result(&self, call: &ToolCall, result: &ToolResult, _elapsed: Duration) {
        self.send(AgentStreamEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            output: result.output.clone(),
            success: result.success,
        });
    }

    fn on_plan(&self, plan: &Plan) {
        self.send(AgentStreamEvent::Plan { plan: plan.clone() });
    }

    fn on_step_field(&self, update: &StepFieldUpdate) {
        self.send(AgentStreamEvent::StepField {
            step_index: update.step_index,
            field: update.field.clone(),
            value: update.value.clone(),
            complete: update.complete,
        });
    }

    fn on_step_status(&self, step_id: &str, status: StepStatus) {
        self.send(AgentStreamEvent::StepStatus {
            step_id: step_id.to_string(),
            status,
        });
    }

    fn on_plan_complete(&self, plan: &Plan) {
        self.send(AgentStreamEvent::PlanComplete {
            plan_id: plan.id.clone(),
            version: plan.version,
            status: plan.status,
        });
    }

    fn on_feedback(&self, feedback: &Feedback) {
        self.send(AgentStreamEvent::Feedback {
            feedback: feedback.clone(),
        });
    }
}

/// Republishes notifications on the core [`EventBus`].
pub struct EventBusObserver {
    bus: Arc<EventBus>,
    run_id: String,
}

impl EventBusObserver {
    pub fn new(bus: Arc<EventBus>, run_id: impl Into<String>) -> Self {
        Self {
            bus,
            run_id: run_id.into(),
        }
    }
}

impl RunObserver for EventBusObserver {
    fn on_stage(&self, stage: &str) {
        self.bus.publish(DomainEvent::StageEntered {
            run_id: self.run_id.clone(),
            stage: stage.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn on_chunk(&self, stage: &str, delta: &str) {
        self.bus.publish(DomainEvent::TextProduced {
            run_id: self.run_id.clone(),
            stage: stage.to_string(),
            delta: delta.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn on_tool_result(&self, call: &ToolCall, result: &ToolResult, elapsed: Duration) {
        self.bus.publish(DomainEvent::ToolExecuted {
            run_id: self.run_id.clone(),
            tool_name: call.name.clone(),
            success: result.success,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    fn on_step_field(&self, update: &StepFieldUpdate) {
        self.bus.publish(DomainEvent::PlanStepUpdated {
            run_id: self.run_id.clone(),
            step_index: update.step_index,
            field: update.field.clone(),
            value: update.value.clone(),
            complete: update.complete,
            timestamp: Utc::now(),
        });
    }

    fn on_step_status(&self, step_id: &str, status: StepStatus) {
        self.bus.publish(DomainEvent::StepStatusChanged {
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            status: status.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn on_plan_complete(&self, plan: &Plan) {
        self.bus.publish(DomainEvent::PlanCompleted {
            run_id: self.run_id.clone(),
            plan_id: plan.id.clone(),
            version: plan.version,
            status: plan.status.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }

    fn on_complete(&self, answer: &Message) {
        self.bus.publish(DomainEvent::RunCompleted {
            run_id: self.run_id.clone(),
            answer_preview: answer.content.chars().take(200).collect(),
            timestamp: Utc::now(),
        });
    }
}
