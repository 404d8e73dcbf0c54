//! The named stages of an orchestration.
//!
//! ```text
//! ConversationAnalysis → ComplexityBranch ─┬─ simple ─→ DirectAnswer ──────────────→ End
//!                                          └─ other ──→ PlanCreation
//!                                                            │
//!   ┌────────────────────────────────────────────────────────┘
//!   ▼
//! PlanExecution → SpecialistDispatch → ResultCollection → FeedbackEvaluation
//!   ▲                                                           │
//!   │                                                    ReflectionBranch
//!   ├──────────────── next round ───────────────────────────────┤
//!   └── PlanUpdate ←──────────── needs update ──────────────────┤
//!                                                               └─→ FinalAnswer → End
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStage {
    ConversationAnalysis,
    ComplexityBranch,
    DirectAnswer,
    PlanCreation,
    PlanExecution,
    SpecialistDispatch,
    ResultCollection,
    FeedbackEvaluation,
    ReflectionBranch,
    PlanUpdate,
    FinalAnswer,
    End,
}

impl OrchestrationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConversationAnalysis => "conversation_analysis",
            Self::ComplexityBranch => "complexity_branch",
            Self::DirectAnswer => "direct_answer",
            Self::PlanCreation => "plan_creation",
            Self::PlanExecution => "plan_execution",
            Self::SpecialistDispatch => "specialist_dispatch",
            Self::ResultCollection => "result_collection",
            Self::FeedbackEvaluation => "feedback_evaluation",
            Self::ReflectionBranch => "reflection_branch",
            Self::PlanUpdate => "plan_update",
            Self::FinalAnswer => "final_answer",
            Self::End => "end",
        }
    }
}

impl fmt::Display for OrchestrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
