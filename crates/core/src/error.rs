//! Error types for the thinkloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each external capability has its own error enum; the top-level [`Error`]
//! adds the structural failures raised by the controllers themselves.

use thiserror::Error;

/// The top-level error type for all engine operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Capability errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Structural errors ---
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to parse {stage} output: {message}")]
    Parse { stage: String, message: String },

    /// Any error, annotated with the controller stage that raised it.
    #[error("[{stage}] {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Build a parse error for the given stage.
    pub fn parse(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Attach the name of the stage that produced this error.
    ///
    /// Already-annotated errors and cancellations are returned unchanged so
    /// nested controllers do not stack stage labels.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        match self {
            Self::Stage { .. } | Self::Cancelled => self,
            other => Self::Stage {
                stage: stage.into(),
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was raised in, if it was annotated.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            Self::Parse { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// The error with any stage annotation removed.
    pub fn root(&self) -> &Error {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for failures of an external capability (generation, tools,
    /// store) that may succeed on a later attempt. Parse, plan and
    /// configuration failures are structural and will not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            Self::Provider(_) | Self::Tool(_) | Self::Store(_)
        )
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Capability errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Conversation not found: {0}")]
    NotFound(String),
}

/// Rejected plan mutations. A failed operation aborts the whole revision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("step '{0}' is completed and cannot be modified")]
    StepCompleted(String),

    #[error("step '{0}' is running and cannot be removed")]
    StepRunning(String),

    #[error("step '{0}' does not exist in the plan")]
    StepNotFound(String),

    #[error("step '{0}' already exists in the plan")]
    DuplicateStep(String),

    #[error("step '{step}' cannot start: dependency '{dependency}' is not completed")]
    DependenciesIncomplete { step: String, dependency: String },

    #[error("step '{0}' is part of a dependency cycle")]
    DependencyCycle(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn stage_annotation_keeps_cause() {
        let err = Error::from(ProviderError::Network("reset".into())).in_stage("plan_creation");
        assert_eq!(err.stage(), Some("plan_creation"));
        assert!(err.to_string().contains("plan_creation"));
        assert!(err.to_string().contains("reset"));
        assert!(err.is_transient());
    }

    #[test]
    fn stage_annotation_is_not_stacked() {
        let err = Error::parse("feedback", "expected value")
            .in_stage("feedback_evaluation")
            .in_stage("outer");
        assert_eq!(err.stage(), Some("feedback_evaluation"));
        assert!(!err.is_transient());
    }

    #[test]
    fn cancellation_is_never_wrapped() {
        let err = Error::Cancelled.in_stage("reasoning");
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn plan_error_is_structural() {
        let err: Error = PlanError::StepCompleted("s1".into()).into();
        assert!(err.to_string().contains("s1"));
        assert!(!err.is_transient());
    }
}
