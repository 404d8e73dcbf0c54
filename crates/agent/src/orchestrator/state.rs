//! Per-invocation orchestration state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thinkloop_core::{Message, Role};

use super::analysis::ConversationAnalysis;
use super::feedback::Feedback;
use crate::plan::{Plan, StepResult};

/// Where plan execution stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    NotStarted,
    /// A step is running or waiting to be dispatched.
    Running,
    /// No step is left to run.
    PlanComplete,
}

/// State owned by one orchestration invocation.
///
/// Each stage handler receives it by `&mut`; nothing here is shared with
/// another invocation.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationState {
    /// The caller's conversation.
    pub messages: Vec<Message>,
    pub round: u32,
    pub max_rounds: u32,
    pub analysis: Option<ConversationAnalysis>,
    pub plan: Option<Plan>,
    /// Superseded plan versions, oldest first.
    pub plan_history: Vec<Plan>,
    pub execution_status: ExecutionStatus,
    /// Step chosen by the current round's plan execution.
    pub active_step: Option<String>,
    /// Step results of the current round, keyed by step id.
    pub step_results: BTreeMap<String, StepResult>,
    /// One summary message per round.
    pub collected: Vec<Message>,
    pub feedback_history: Vec<Feedback>,
    pub completed: bool,
    pub final_answer: Option<Message>,
    /// Keep `step_results` across the next round boundary (set by a plan
    /// update so unaffected results survive the revision).
    pub preserve_results: bool,
    pub tool_calls_made: usize,
}

impl OrchestrationState {
    pub fn new(messages: Vec<Message>, max_rounds: u32) -> Self {
        Self {
            messages,
            max_rounds,
            ..Default::default()
        }
    }

    /// Start a new execution round.
    pub fn begin_round(&mut self) {
        self.round += 1;
        if self.preserve_results {
            self.preserve_results = false;
        } else {
            self.step_results.clear();
        }
        self.active_step = None;
    }

    /// Drop the results of revised or removed steps.
    pub fn invalidate(&mut self, step_ids: &[String]) {
        for id in step_ids {
            self.step_results.remove(id);
        }
    }

    /// Whether the round limit has been reached.
    pub fn at_round_limit(&self) -> bool {
        self.round >= self.max_rounds
    }

    /// The most recent user message, used as "the question" in prompts.
    pub fn question(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    pub fn latest_feedback(&self) -> Option<&Feedback> {
        self.feedback_history.last()
    }
}
