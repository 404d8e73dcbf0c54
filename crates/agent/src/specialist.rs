//! Specialists: the workers an orchestration dispatches plan steps to.
//!
//! A specialist is backed by exactly one of three things: a full reasoning
//! loop, a plain async callable, or a single bound generation call.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use thinkloop_config::SpecialistConfig;
use thinkloop_core::{Message, Provider, Result, ToolRegistry};
use tracing::debug;

use crate::cancel::cancellable;
use crate::options::RunOptions;
use crate::plan::PlanStep;
use crate::reasoning::ReasoningLoop;

/// Confidence recorded for specialists that do not report one.
const UNSTATED_CONFIDENCE: f32 = 0.5;

/// Async function signature accepted by [`SpecialistKind::Callable`].
pub type SpecialistFn = Arc<dyn Fn(SpecialistTask) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// What a specialist is given to work on.
#[derive(Debug, Clone)]
pub struct SpecialistTask {
    /// The step being executed.
    pub step: PlanStep,
    /// The conversation plus the step instruction, ready to send.
    pub messages: Vec<Message>,
    /// Set on the orchestration's last round.
    pub force_final_answer: bool,
}

/// What a specialist produced.
#[derive(Debug, Clone)]
pub struct SpecialistOutcome {
    pub output: String,
    /// False when a sub-agent gave up on its iteration limit.
    pub success: bool,
    pub confidence: f32,
    pub iterations: u32,
    pub tool_calls_made: usize,
}

/// The backing implementation of a specialist.
#[derive(Clone)]
pub enum SpecialistKind {
    /// A reasoning loop with its own tools and limits.
    SubAgent(ReasoningLoop),
    /// Arbitrary async code.
    Callable(SpecialistFn),
    /// One generation call with a fixed system prompt.
    BoundModel {
        provider: Arc<dyn Provider>,
        model: String,
        system_prompt: Option<String>,
    },
}

impl SpecialistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubAgent(_) => "sub_agent",
            Self::Callable(_) => "callable",
            Self::BoundModel { .. } => "bound_model",
        }
    }
}

/// A named worker the planner can assign steps to.
#[derive(Clone)]
pub struct Specialist {
    name: String,
    description: String,
    kind: SpecialistKind,
}

impl Specialist {
    /// A specialist backed by a reasoning loop.
    pub fn sub_agent(name: impl Into<String>, description: impl Into<String>, agent: ReasoningLoop) -> Self {
        let name = name.into();
        Self {
            kind: SpecialistKind::SubAgent(agent.with_name(name.clone())),
            name,
            description: description.into(),
        }
    }

    /// A specialist backed by an async function.
    pub fn callable<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(SpecialistTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let f: SpecialistFn = Arc::new(move |task: SpecialistTask| -> BoxFuture<'static, Result<String>> {
            Box::pin(f(task))
        });
        Self {
            name: name.into(),
            description: description.into(),
            kind: SpecialistKind::Callable(f),
        }
    }

    /// A specialist that answers with a single generation call.
    pub fn bound_model(
        name: impl Into<String>,
        description: impl Into<String>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: SpecialistKind::BoundModel {
                provider,
                model: model.into(),
                system_prompt,
            },
        }
    }

    /// Build a sub-agent specialist from its configuration entry.
    ///
    /// Unknown tool names are a configuration error.
    pub fn from_config(
        config: &SpecialistConfig,
        provider: Arc<dyn Provider>,
        default_model: &str,
        tools: &ToolRegistry,
    ) -> Result<Self> {
        let model = config.model.as_deref().unwrap_or(default_model);
        let mut agent = ReasoningLoop::new(provider, model, tools.subset(&config.tools)?);
        if let Some(max) = config.max_iterations {
            agent = agent.with_max_iterations(max);
        }
        if let Some(prompt) = &config.system_prompt {
            agent = agent.with_system_prompt(prompt.clone());
        } else {
            agent = agent.with_system_prompt(format!(
                "You are the {} specialist. {}",
                config.name, config.description
            ));
        }
        Ok(Self::sub_agent(config.name.clone(), config.description.clone(), agent))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> &SpecialistKind {
        &self.kind
    }

    /// Execute one task to completion.
    pub async fn run(&self, task: SpecialistTask, options: &RunOptions) -> Result<SpecialistOutcome> {
        self.execute(task, options, false).await
    }

    pub(crate) async fn execute(
        &self,
        task: SpecialistTask,
        options: &RunOptions,
        streaming: bool,
    ) -> Result<SpecialistOutcome> {
        debug!(
            specialist = %self.name,
            kind = self.kind.as_str(),
            step_id = %task.step.id,
            "Running specialist"
        );

        match &self.kind {
            SpecialistKind::SubAgent(agent) => {
                let mut options = options.clone();
                options.force_final_answer = task.force_final_answer;
                let result = agent.run(task.messages, &options, streaming).await?;
                Ok(SpecialistOutcome {
                    success: !result.limit_reached,
                    confidence: result.confidence(),
                    output: result.answer.content,
                    iterations: result.iterations,
                    tool_calls_made: result.tool_calls_made,
                })
            }
            SpecialistKind::Callable(f) => {
                let output = cancellable(&options.cancellation, (f.as_ref())(task)).await?;
                Ok(SpecialistOutcome {
                    output,
                    success: true,
                    confidence: 1.0,
                    iterations: 0,
                    tool_calls_made: 0,
                })
            }
            SpecialistKind::BoundModel {
                provider,
                model,
                system_prompt,
            } => {
                let mut messages = Vec::with_capacity(task.messages.len() + 1);
                if let Some(prompt) = system_prompt {
                    messages.push(Message::system(prompt.clone()));
                }
                messages.extend(task.messages);

                let agent = ReasoningLoop::new(provider.clone(), model.clone(), ToolRegistry::new())
                    .with_name(self.name.clone());
                let mut forward = |delta: &str| {
                    if streaming {
                        for observer in &options.observers {
                            observer.on_chunk("specialist", delta);
                        }
                    }
                };
                let reply = agent
                    .call_model(agent.request(messages), streaming, &options.cancellation, &mut forward)
                    .await?;
                Ok(SpecialistOutcome {
                    output: reply.content,
                    success: true,
                    confidence: UNSTATED_CONFIDENCE,
                    iterations: 1,
                    tool_calls_made: 0,
                })
            }
        }
    }
}

impl std::fmt::Debug for Specialist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Specialist")
            .field("name", &self.name)
            .field("kind", &self.kind.as_str())
            .finish()
    }
}
