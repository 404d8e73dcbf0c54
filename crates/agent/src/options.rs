//! Per-invocation options shared by both controllers.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::observer::RunObserver;

/// Options for one `invoke` or `stream` call.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Overrides the controller's iteration limit for this run.
    pub max_iterations: Option<u32>,

    /// Overrides the orchestrator's round limit for this run.
    pub max_rounds: Option<u32>,

    /// Turn the next reasoning decision into a final answer.
    pub force_final_answer: bool,

    /// Notified synchronously, in order, as the run progresses.
    pub observers: Vec<Arc<dyn RunObserver>>,

    /// Cancels the run at its next suspension point.
    pub cancellation: CancellationToken,

    /// When set, the finalized transcript is appended to the attached
    /// message store under this id.
    pub conversation_id: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = Some(max);
        self
    }

    pub fn with_force_final_answer(mut self, force: bool) -> Self {
        self.force_final_answer = force;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("max_iterations", &self.max_iterations)
            .field("max_rounds", &self.max_rounds)
            .field("force_final_answer", &self.force_final_answer)
            .field("observers", &self.observers.len())
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}
