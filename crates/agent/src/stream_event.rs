//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what the `stream` entry points of both controllers
//! yield. Each variant mirrors one [`RunObserver`](crate::RunObserver)
//! notification, plus a terminal `done` or `error`.

use serde::{Deserialize, Serialize};

use crate::orchestrator::Feedback;
use crate::plan::{Plan, PlanStatus, StepStatus};

/// Events emitted by a controller during streaming execution.
///
/// - `stage`: the controller entered a stage
/// - `chunk`: partial text from the model
/// - `thought`: a parsed reasoning decision
/// - `tool_call`: a tool is being invoked
/// - `tool_result`: tool execution completed
/// - `plan`: a plan was created or revised
/// - `step_field`: a plan step field arrived before the plan was complete
/// - `step_status`: a plan step changed status
/// - `plan_complete`: plan execution found nothing left to run
/// - `feedback`: a round was evaluated
/// - `done`: the run finished; always the last event on success
/// - `error`: the run failed; always the last event on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Stage {
        stage: String,
    },

    Chunk {
        stage: String,
        content: String,
    },

    Thought {
        content: String,
        action: String,
        confidence: f32,
    },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    Plan {
        plan: Plan,
    },

    StepField {
        step_index: usize,
        field: String,
        value: serde_json::Value,
        complete: bool,
    },

    StepStatus {
        step_id: String,
        status: StepStatus,
    },

    PlanComplete {
        plan_id: String,
        version: u32,
        status: PlanStatus,
    },

    Feedback {
        feedback: Feedback,
    },

    /// The run finished; carries the final answer and counters.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        answer: String,
        /// Reasoning iterations, or orchestration rounds
        iterations: usize,
        tool_calls_made: usize,
    },

    /// An error occurred mid-stream.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },
}

impl AgentStreamEvent {
    /// Event name for this event type (SSE `event:` field).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Stage { .. } => "stage",
            Self::Chunk { .. } => "chunk",
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Plan { .. } => "plan",
            Self::StepField { .. } => "step_field",
            Self::StepStatus { .. } => "step_status",
            Self::PlanComplete { .. } => "plan_complete",
            Self::Feedback { .. } => "feedback",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub(crate) fn from_error(err: &thinkloop_core::Error) -> Self {
        Self::Error {
            message: err.to_string(),
            stage: err.stage().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            stage: "final_answer".into(),
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_step_status() {
        let event = AgentStreamEvent::StepStatus {
            step_id: "s1".into(),
            status: StepStatus::Running,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"step_status""#));
        assert!(json.contains(r#""status":"running""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            conversation_id: None,
            answer: "42".into(),
            iterations: 2,
            tool_calls_made: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""iterations":2"#));
        assert!(!json.contains("conversation_id"));
        assert!(event.is_terminal());
    }

    #[test]
    fn error_event_carries_stage() {
        let err = thinkloop_core::Error::parse("plan_creation", "expected value").in_stage("plan_creation");
        let event = AgentStreamEvent::from_error(&err);
        match event {
            AgentStreamEvent::Error { stage, message } => {
                assert_eq!(stage.as_deref(), Some("plan_creation"));
                assert!(message.contains("expected value"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            AgentStreamEvent::Stage {
                stage: "x".into()
            }
            .event_type(),
            "stage"
        );
        assert_eq!(
            AgentStreamEvent::StepField {
                step_index: 0,
                field: "name".into(),
                value: serde_json::Value::Null,
                complete: false
            }
            .event_type(),
            "step_field"
        );
        assert_eq!(
            AgentStreamEvent::Error {
                message: "x".into(),
                stage: None
            }
            .event_type(),
            "error"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"chunk","stage":"reasoning","content":"hi"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::Chunk { content, .. } => assert_eq!(content, "hi"),
            _ => panic!("Wrong variant"),
        }
    }
}
