//! The thinkloop controllers.
//!
//! - [`ReasoningLoop`] runs one agent through **think → decide → act →
//!   observe** until it produces a final answer, a return-directly tool
//!   fires, or the iteration limit forces one.
//! - [`Orchestrator`] drives a host and a set of [`Specialist`]s through
//!   analysis, planning, step execution, evaluation and plan revision.
//!
//! Both controllers offer a blocking `invoke` and a `stream` that yields
//! [`AgentStreamEvent`]s. Per-run behaviour (limits, observers,
//! cancellation, persistence) is set through [`RunOptions`].

mod cancel;
pub mod json;
pub mod observer;
pub mod options;
pub mod orchestrator;
pub mod plan;
pub mod reasoning;
pub mod specialist;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use observer::{EventBusObserver, RunObserver, StepFieldUpdate};
pub use options::RunOptions;
pub use orchestrator::{
    Complexity, ConversationAnalysis, Feedback, OrchestrationResult, OrchestrationStage,
    Orchestrator,
};
pub use plan::{
    Plan, PlanOperation, PlanRevision, PlanStatus, PlanStep, StepResult, StepStatus,
};
pub use reasoning::{Action, ReasoningDecision, ReasoningLoop, ReasoningResult, ReasoningStage};
pub use specialist::{Specialist, SpecialistKind, SpecialistOutcome, SpecialistTask};
pub use stream_event::AgentStreamEvent;
pub use tokio_util::sync::CancellationToken;
