//! Reasoning loop stages and per-invocation state.

use serde::{Deserialize, Serialize};
use std::fmt;
use thinkloop_core::{Message, Role};

use super::decision::ReasoningDecision;

/// The named stages of the reasoning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStage {
    Init,
    Reasoning,
    Decision,
    Tools,
    ToolsChecker,
    Complete,
}

impl ReasoningStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Reasoning => "reasoning",
            Self::Decision => "decision",
            Self::Tools => "tools",
            Self::ToolsChecker => "tools_checker",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for ReasoningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State owned by one reasoning loop invocation.
///
/// Created when the run starts and dropped when it returns; nothing here
/// outlives the call.
#[derive(Debug, Clone, Default)]
pub struct AgentRunState {
    pub transcript: Vec<Message>,
    pub history: Vec<ReasoningDecision>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub completed: bool,
    pub final_answer: Option<String>,
    /// Correlation id of a return-directly tool result waiting to become
    /// the final answer.
    pub return_direct_call: Option<String>,
    pub tool_calls_made: usize,
    pub limit_reached: bool,
}

impl AgentRunState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            ..Default::default()
        }
    }

    /// Seed the transcript with the caller's messages.
    pub fn seed(&mut self, messages: Vec<Message>) {
        self.transcript = messages;
        self.iteration = 0;
    }

    /// Content of the tool message answering `call_id`.
    pub fn tool_output(&self, call_id: &str) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
            .map(|m| m.content.as_str())
    }
}
