//! Orchestration Graph Controller: host/specialist coordination.
//!
//! The host (a [`ReasoningLoop`] used for raw generation) analyses the
//! conversation, plans, evaluates each round and writes the final answer.
//! Plan steps are executed one per round by [`Specialist`]s. See
//! [`OrchestrationStage`] for the stage graph.

pub mod analysis;
pub mod feedback;
pub mod prompt;
pub mod stage;
pub mod state;

pub use analysis::{Complexity, ConversationAnalysis};
pub use feedback::Feedback;
pub use stage::OrchestrationStage;
pub use state::{ExecutionStatus, OrchestrationState};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thinkloop_config::{DEFAULT_MAX_ROUNDS, EngineConfig, positive_or_default};
use thinkloop_core::{Error, Message, MessageStore, Provider, Result, ToolRegistry};
use thinkloop_extractor::{ExtractError, ParserOptions, StreamingJsonParser};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::check_cancelled;
use crate::json::parse_reply;
use crate::observer::{ChannelObserver, Observers, StepFieldUpdate};
use crate::options::RunOptions;
use crate::plan::{Plan, PlanOperation, PlanStatus, StepResult, StepStatus};
use crate::reasoning::ReasoningLoop;
use crate::reasoning::prompt::APOLOGY_MESSAGE;
use crate::specialist::{Specialist, SpecialistTask};
use crate::stream_event::AgentStreamEvent;

/// Plan step fields surfaced while the plan is still being generated.
const PROGRESSIVE_FIELDS: [&str; 4] = ["name", "description", "specialist", "priority"];

/// Receives text deltas of one host generation call.
type DeltaSink = Box<dyn FnMut(&str) + Send>;

/// Coordinates a host and a set of specialists over a revisable plan.
#[derive(Clone)]
pub struct Orchestrator {
    host: ReasoningLoop,
    /// In registration order; the planner sees them in this order.
    specialists: Vec<Specialist>,
    fallback: Option<String>,
    max_rounds: u32,
    progressive_plan: bool,
    json_retries: u32,
    store: Option<Arc<dyn MessageStore>>,
}

/// The outcome of one orchestration.
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub answer: Message,
    pub analysis: Option<ConversationAnalysis>,
    /// The final plan; `None` on the direct-answer path.
    pub plan: Option<Plan>,
    pub plan_history: Vec<Plan>,
    pub rounds: u32,
    pub feedback: Vec<Feedback>,
    /// Results of the last round, keyed by step id.
    pub step_results: BTreeMap<String, StepResult>,
    pub collected: Vec<Message>,
    pub tool_calls_made: usize,
}

#[derive(Deserialize)]
struct PlanUpdateReply {
    #[serde(default)]
    operations: Vec<PlanOperation>,
}

/// Per-run plumbing handed to every stage.
struct RunContext<'a> {
    options: &'a RunOptions,
    observers: Observers,
    streaming: bool,
}

impl RunContext<'_> {
    /// Options for a specialist run nested inside this orchestration.
    fn child_options(&self, force_final_answer: bool) -> RunOptions {
        RunOptions {
            max_iterations: None,
            max_rounds: None,
            force_final_answer,
            observers: self.observers.nested(),
            cancellation: self.options.cancellation.clone(),
            conversation_id: None,
        }
    }
}

impl Orchestrator {
    /// Create an orchestrator driven by `host`.
    pub fn new(host: ReasoningLoop) -> Self {
        Self {
            host: host.with_name("host"),
            specialists: Vec::new(),
            fallback: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            progressive_plan: true,
            json_retries: 0,
            store: None,
        }
    }

    /// Build the host and every configured specialist.
    pub fn from_config(
        config: &EngineConfig,
        provider: Option<Arc<dyn Provider>>,
        tools: ToolRegistry,
    ) -> Result<Self> {
        let host = ReasoningLoop::from_config(config, provider, tools.clone())?;
        let settings = &config.orchestration;

        let mut orchestrator = Self::new(host.clone())
            .with_max_rounds(settings.max_rounds)
            .with_progressive_plan(settings.progressive_plan)
            .with_json_retries(settings.json_retries);
        for specialist in &settings.specialists {
            orchestrator = orchestrator.with_specialist(Specialist::from_config(
                specialist,
                host.provider().clone(),
                host.model(),
                &tools,
            )?);
        }
        if let Some(fallback) = &settings.fallback_specialist {
            orchestrator = orchestrator.with_fallback_specialist(fallback)?;
        }
        Ok(orchestrator)
    }

    /// Register a specialist, replacing one with the same name.
    pub fn with_specialist(mut self, specialist: Specialist) -> Self {
        match self.specialists.iter_mut().find(|s| s.name() == specialist.name()) {
            Some(existing) => *existing = specialist,
            None => self.specialists.push(specialist),
        }
        self
    }

    /// Specialist receiving steps assigned to an unregistered name.
    pub fn with_fallback_specialist(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if self.specialist(&name).is_none() {
            return Err(Error::config(format!(
                "fallback specialist '{name}' is not registered"
            )));
        }
        self.fallback = Some(name);
        Ok(self)
    }

    /// Set the round limit. Zero is corrected to the default.
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = positive_or_default("max_rounds", max, DEFAULT_MAX_ROUNDS);
        self
    }

    pub fn with_progressive_plan(mut self, enabled: bool) -> Self {
        self.progressive_plan = enabled;
        self
    }

    /// Re-prompts allowed when plan, feedback or update JSON does not parse.
    pub fn with_json_retries(mut self, retries: u32) -> Self {
        self.json_retries = retries;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn host(&self) -> &ReasoningLoop {
        &self.host
    }

    pub fn specialists(&self) -> &[Specialist] {
        &self.specialists
    }

    pub fn specialist(&self, name: &str) -> Option<&Specialist> {
        self.specialists.iter().find(|s| s.name() == name)
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Run the orchestration to completion.
    pub async fn invoke(
        &self,
        messages: Vec<Message>,
        options: RunOptions,
    ) -> Result<OrchestrationResult> {
        self.run(messages, &options, false).await
    }

    /// Run on a spawned task, yielding events as they happen.
    ///
    /// The last event is always `Done` or `Error`.
    pub fn stream(
        &self,
        messages: Vec<Message>,
        options: RunOptions,
    ) -> mpsc::UnboundedReceiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = self.clone();

        tokio::spawn(async move {
            let mut options = options;
            options
                .observers
                .push(Arc::new(ChannelObserver::new(tx.clone())));

            let event = match orchestrator.run(messages, &options, true).await {
                Ok(result) => AgentStreamEvent::Done {
                    conversation_id: options.conversation_id.clone(),
                    answer: result.answer.content,
                    iterations: result.rounds as usize,
                    tool_calls_made: result.tool_calls_made,
                },
                Err(e) => {
                    warn!(error = %e, "Orchestration stream failed");
                    AgentStreamEvent::from_error(&e)
                }
            };
            let _ = tx.send(event);
        });

        rx
    }

    async fn run(
        &self,
        messages: Vec<Message>,
        options: &RunOptions,
        streaming: bool,
    ) -> Result<OrchestrationResult> {
        let ctx = RunContext {
            options,
            observers: Observers::new(&options.observers),
            streaming,
        };
        let max_rounds = options
            .max_rounds
            .map(|n| positive_or_default("max_rounds", n, DEFAULT_MAX_ROUNDS))
            .unwrap_or(self.max_rounds);

        let mut state = OrchestrationState::new(messages, max_rounds);
        let mut stage = OrchestrationStage::ConversationAnalysis;
        info!(
            max_rounds,
            specialists = self.specialists.len(),
            "Orchestration started"
        );

        while stage != OrchestrationStage::End {
            check_cancelled(&options.cancellation)?;
            ctx.observers.notify(|o| o.on_stage(stage.as_str()));
            debug!(stage = %stage, round = state.round, "Orchestration stage");

            let current = stage;
            let next = match current {
                OrchestrationStage::ConversationAnalysis => self.analyze(&mut state, &ctx).await,
                OrchestrationStage::ComplexityBranch => Ok(self.route_complexity(&state)),
                OrchestrationStage::DirectAnswer => self.direct_answer(&mut state, &ctx).await,
                OrchestrationStage::PlanCreation => self.create_plan(&mut state, &ctx).await,
                OrchestrationStage::PlanExecution => self.execute_plan(&mut state, &ctx),
                OrchestrationStage::SpecialistDispatch => self.dispatch(&mut state, &ctx).await,
                OrchestrationStage::ResultCollection => Ok(self.collect_results(&mut state)),
                OrchestrationStage::FeedbackEvaluation => self.evaluate(&mut state, &ctx).await,
                OrchestrationStage::ReflectionBranch => Ok(self.reflect(&state)),
                OrchestrationStage::PlanUpdate => self.update_plan(&mut state, &ctx).await,
                OrchestrationStage::FinalAnswer => self.final_answer(&mut state, &ctx).await,
                OrchestrationStage::End => Ok(OrchestrationStage::End),
            };
            stage = next.map_err(|e| e.in_stage(current.as_str()))?;
        }
        ctx.observers.notify(|o| o.on_stage(OrchestrationStage::End.as_str()));

        let answer = state
            .final_answer
            .take()
            .filter(|m| !m.content.trim().is_empty())
            .unwrap_or_else(|| Message::assistant(APOLOGY_MESSAGE).with_metadata("agent", "host"));
        info!(
            rounds = state.round,
            plan_versions = state.plan_history.len() + usize::from(state.plan.is_some()),
            tool_calls = state.tool_calls_made,
            "Orchestration complete"
        );
        ctx.observers.notify(|o| o.on_complete(&answer));
        self.persist(options, &state.messages, &answer).await;

        Ok(OrchestrationResult {
            answer,
            analysis: state.analysis,
            plan: state.plan,
            plan_history: state.plan_history,
            rounds: state.round,
            feedback: state.feedback_history,
            step_results: state.step_results,
            collected: state.collected,
            tool_calls_made: state.tool_calls_made,
        })
    }

    // ── Stages ──────────────────────────────────────────────────────────

    async fn analyze(&self, state: &mut OrchestrationState, ctx: &RunContext<'_>) -> Result<OrchestrationStage> {
        let messages = vec![
            Message::system(prompt::ANALYSIS_SYSTEM),
            Message::user(prompt::analysis_request(&state.messages)),
        ];
        let mut sink = self.chunk_sink(OrchestrationStage::ConversationAnalysis, ctx);
        let reply = self.host_call(messages, ctx, &mut sink).await?;

        // An unreadable analysis is treated as a simple request.
        match parse_reply::<ConversationAnalysis>("conversation_analysis", &reply.content) {
            Ok(analysis) => {
                info!(
                    complexity = analysis.complexity.as_str(),
                    topics = analysis.topics.len(),
                    "Conversation analysed"
                );
                state.analysis = Some(analysis);
            }
            Err(e) => warn!(error = %e, "Could not parse conversation analysis, answering directly"),
        }
        Ok(OrchestrationStage::ComplexityBranch)
    }

    fn route_complexity(&self, state: &OrchestrationState) -> OrchestrationStage {
        match &state.analysis {
            Some(analysis) if analysis.complexity.needs_plan() => OrchestrationStage::PlanCreation,
            _ => OrchestrationStage::DirectAnswer,
        }
    }

    async fn direct_answer(
        &self,
        state: &mut OrchestrationState,
        ctx: &RunContext<'_>,
    ) -> Result<OrchestrationStage> {
        let mut messages = vec![Message::system(prompt::DIRECT_SYSTEM)];
        messages.extend(state.messages.iter().cloned());
        let mut sink = self.chunk_sink(OrchestrationStage::DirectAnswer, ctx);
        let reply = self.host_call(messages, ctx, &mut sink).await?;

        state.final_answer = Some(Message::assistant(reply.content).with_metadata("agent", "host"));
        state.completed = true;
        Ok(OrchestrationStage::End)
    }

    async fn create_plan(
        &self,
        state: &mut OrchestrationState,
        ctx: &RunContext<'_>,
    ) -> Result<OrchestrationStage> {
        let messages = vec![
            Message::system(prompt::plan_system(&self.specialists)),
            Message::user(prompt::plan_request(state.question(), state.analysis.as_ref())),
        ];
        let mut plan: Plan = self
            .generate_json(OrchestrationStage::PlanCreation, messages, ctx, || {
                self.plan_sink(ctx)
            })
            .await?;
        plan.normalize()?;
        if plan.name.is_empty() {
            plan.name = "plan".into();
        }

        info!(plan_id = %plan.id, steps = plan.steps.len(), "Plan created");
        ctx.observers.notify(|o| o.on_plan(&plan));
        state.plan = Some(plan);
        Ok(OrchestrationStage::PlanExecution)
    }

    fn execute_plan(&self, state: &mut OrchestrationState, ctx: &RunContext<'_>) -> Result<OrchestrationStage> {
        state.begin_round();
        let round = state.round;
        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| Error::Internal("plan execution without a plan".into()))?;

        for id in plan.skip_blocked_steps() {
            info!(round, step_id = %id, "Skipping step blocked by a failed dependency");
            ctx.observers.notify(|o| o.on_step_status(&id, StepStatus::Skipped));
        }

        let next = plan.next_ready_step().map(|s| s.id.clone());
        match next {
            Some(id) => {
                plan.start_step(&id)?;
                info!(round, step_id = %id, "Step started");
                ctx.observers.notify(|o| o.on_step_status(&id, StepStatus::Running));
                state.active_step = Some(id);
                state.execution_status = ExecutionStatus::Running;
            }
            None => {
                mark_plan_complete(plan, round, &ctx.observers);
                state.execution_status = ExecutionStatus::PlanComplete;
            }
        }
        Ok(OrchestrationStage::SpecialistDispatch)
    }

    async fn dispatch(&self, state: &mut OrchestrationState, ctx: &RunContext<'_>) -> Result<OrchestrationStage> {
        let Some(step_id) = state.active_step.take() else {
            return Ok(OrchestrationStage::ResultCollection);
        };
        let plan = state
            .plan
            .as_ref()
            .ok_or_else(|| Error::Internal("dispatch without a plan".into()))?;
        let step = plan
            .step(&step_id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("active step '{step_id}' vanished from the plan")))?;

        let specialist = self.route_specialist(&step.specialist);
        let force_final_answer = state.at_round_limit();
        let task = SpecialistTask {
            messages: prompt::step_messages(&state.messages, plan, &step),
            step,
            force_final_answer,
        };
        info!(
            round = state.round,
            step_id = %step_id,
            specialist = %specialist.name(),
            force_final_answer,
            "Dispatching step"
        );

        let outcome = specialist
            .execute(task, &ctx.child_options(force_final_answer), ctx.streaming)
            .await?;
        state.tool_calls_made += outcome.tool_calls_made;

        let result = StepResult {
            success: outcome.success,
            output: Message::assistant(outcome.output)
                .with_metadata("specialist", specialist.name())
                .with_metadata("step_id", step_id.clone()),
            confidence: outcome.confidence,
            quality: None,
        };
        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| Error::Internal("dispatch without a plan".into()))?;
        let status = plan.finish_step(&step_id, result.clone())?;
        info!(
            step_id = %step_id,
            status = %status,
            iterations = outcome.iterations,
            "Step finished"
        );
        ctx.observers.notify(|o| o.on_step_status(&step_id, status));
        for id in plan.skip_blocked_steps() {
            info!(step_id = %id, "Skipping step blocked by a failed dependency");
            ctx.observers.notify(|o| o.on_step_status(&id, StepStatus::Skipped));
        }
        if plan.is_finished() {
            mark_plan_complete(plan, state.round, &ctx.observers);
        }
        state.step_results.insert(step_id, result);
        Ok(OrchestrationStage::ResultCollection)
    }

    fn collect_results(&self, state: &mut OrchestrationState) -> OrchestrationStage {
        let summary = prompt::round_summary(state.round, state.plan.as_ref(), &state.step_results);
        debug!(round = state.round, results = state.step_results.len(), "Results collected");
        state
            .collected
            .push(Message::assistant(summary).with_metadata("round", state.round));
        OrchestrationStage::FeedbackEvaluation
    }

    async fn evaluate(&self, state: &mut OrchestrationState, ctx: &RunContext<'_>) -> Result<OrchestrationStage> {
        let summary = state
            .collected
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let messages = vec![
            Message::system(prompt::FEEDBACK_SYSTEM),
            Message::user(prompt::feedback_request(
                state.question(),
                state.plan.as_ref(),
                &summary,
            )),
        ];
        let feedback = self
            .generate_json::<Feedback>(OrchestrationStage::FeedbackEvaluation, messages, ctx, || {
                self.chunk_sink(OrchestrationStage::FeedbackEvaluation, ctx)
            })
            .await?
            .normalized();

        for (id, result) in state.step_results.iter_mut() {
            result.quality = Some(feedback.quality);
            if let Some(step_result) = state
                .plan
                .as_mut()
                .and_then(|p| p.step_mut(id))
                .and_then(|s| s.result.as_mut())
            {
                step_result.quality = Some(feedback.quality);
            }
        }

        info!(
            round = state.round,
            completed = feedback.completed,
            needs_update = feedback.needs_update,
            quality = feedback.quality,
            "Round evaluated"
        );
        ctx.observers.notify(|o| o.on_feedback(&feedback));
        state.feedback_history.push(feedback);
        Ok(OrchestrationStage::ReflectionBranch)
    }

    fn reflect(&self, state: &OrchestrationState) -> OrchestrationStage {
        let Some(feedback) = state.latest_feedback() else {
            return OrchestrationStage::FinalAnswer;
        };
        let plan_finished = state.plan.as_ref().is_none_or(Plan::is_finished);

        if state.at_round_limit() {
            info!(round = state.round, max_rounds = state.max_rounds, "Round limit reached");
            OrchestrationStage::FinalAnswer
        } else if feedback.needs_update {
            OrchestrationStage::PlanUpdate
        } else if feedback.completed || plan_finished {
            OrchestrationStage::FinalAnswer
        } else {
            OrchestrationStage::PlanExecution
        }
    }

    async fn update_plan(&self, state: &mut OrchestrationState, ctx: &RunContext<'_>) -> Result<OrchestrationStage> {
        let current = state
            .plan
            .clone()
            .ok_or_else(|| Error::Internal("plan update without a plan".into()))?;
        let feedback = state.latest_feedback().cloned().unwrap_or_default();
        let messages = vec![
            Message::system(prompt::UPDATE_SYSTEM),
            Message::user(prompt::update_request(&current, &feedback)),
        ];
        let reply: PlanUpdateReply = self
            .generate_json(OrchestrationStage::PlanUpdate, messages, ctx, || {
                self.chunk_sink(OrchestrationStage::PlanUpdate, ctx)
            })
            .await?;

        let revision = current.apply(&reply.operations)?;
        info!(
            version = revision.plan.version,
            operations = reply.operations.len(),
            invalidated = ?revision.invalidated,
            "Plan revised"
        );
        state.invalidate(&revision.invalidated);
        state.preserve_results = true;
        state.plan_history.push(current);
        ctx.observers.notify(|o| o.on_plan(&revision.plan));
        state.plan = Some(revision.plan);
        Ok(OrchestrationStage::PlanExecution)
    }

    async fn final_answer(&self, state: &mut OrchestrationState, ctx: &RunContext<'_>) -> Result<OrchestrationStage> {
        let messages = vec![
            Message::system(prompt::FINAL_SYSTEM),
            Message::user(prompt::final_request(
                state.question(),
                state.plan.as_ref(),
                &state.collected,
            )),
        ];
        let mut sink = self.chunk_sink(OrchestrationStage::FinalAnswer, ctx);
        let reply = self.host_call(messages, ctx, &mut sink).await?;

        state.final_answer = Some(Message::assistant(reply.content).with_metadata("agent", "host"));
        state.completed = true;
        Ok(OrchestrationStage::End)
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    /// The specialist for an assigned name: exact match, then the
    /// configured fallback, then the host itself.
    fn route_specialist(&self, name: &str) -> Specialist {
        if let Some(specialist) = self.specialist(name) {
            return specialist.clone();
        }
        if let Some(fallback) = self.fallback.as_deref().and_then(|f| self.specialist(f)) {
            debug!(assigned = %name, fallback = %fallback.name(), "Routing step to fallback specialist");
            return fallback.clone();
        }
        debug!(assigned = %name, "No specialist registered, host executes the step");
        Specialist::sub_agent("host", "general-purpose host agent", self.host.clone())
    }

    async fn host_call(
        &self,
        messages: Vec<Message>,
        ctx: &RunContext<'_>,
        sink: &mut DeltaSink,
    ) -> Result<Message> {
        self.host
            .call_model(
                self.host.request(messages),
                ctx.streaming,
                &ctx.options.cancellation,
                sink.as_mut(),
            )
            .await
    }

    /// One host call whose reply must parse as `T`, re-prompting up to
    /// `json_retries` times. `new_sink` is invoked once per attempt.
    async fn generate_json<T: DeserializeOwned>(
        &self,
        stage: OrchestrationStage,
        mut messages: Vec<Message>,
        ctx: &RunContext<'_>,
        new_sink: impl Fn() -> DeltaSink,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            let mut sink = new_sink();
            let reply = self.host_call(messages.clone(), ctx, &mut sink).await?;
            match parse_reply::<T>(stage.as_str(), &reply.content) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.json_retries => {
                    attempt += 1;
                    warn!(stage = %stage, attempt, error = %e, "Malformed JSON reply, re-prompting");
                    messages.push(reply);
                    messages.push(Message::user(prompt::repair_request(&e.to_string())));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Forwards deltas as chunks when streaming.
    fn chunk_sink(&self, stage: OrchestrationStage, ctx: &RunContext<'_>) -> DeltaSink {
        let observers = ctx.observers.clone();
        let streaming = ctx.streaming;
        Box::new(move |delta: &str| {
            if streaming {
                observers.notify(|o| o.on_chunk(stage.as_str(), delta));
            }
        })
    }

    /// Chunk forwarding plus progressive step extraction.
    fn plan_sink(&self, ctx: &RunContext<'_>) -> DeltaSink {
        let mut forward = self.chunk_sink(OrchestrationStage::PlanCreation, ctx);
        if !self.progressive_plan {
            return forward;
        }
        let mut parser = match step_field_parser(&ctx.observers) {
            Ok(parser) => parser,
            Err(e) => {
                warn!(error = %e, "Progressive plan extraction disabled");
                return forward;
            }
        };

        let mut failed = false;
        Box::new(move |delta: &str| {
            forward(delta);
            if !failed && let Err(e) = parser.feed(delta) {
                // The final parse decides whether the plan is usable.
                debug!(error = %e, "Progressive plan extraction stopped");
                failed = true;
            }
        })
    }

    async fn persist(&self, options: &RunOptions, conversation: &[Message], answer: &Message) {
        let (Some(store), Some(conversation_id)) = (&self.store, &options.conversation_id) else {
            return;
        };
        let mut messages = conversation.to_vec();
        messages.push(answer.clone());
        if let Err(e) = store.append(conversation_id, &messages).await {
            warn!(
                conversation_id = %conversation_id,
                store = store.name(),
                error = %e,
                "Failed to append conversation to message store"
            );
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("host", &self.host)
            .field("specialists", &self.specialists)
            .field("fallback", &self.fallback)
            .field("max_rounds", &self.max_rounds)
            .field("progressive_plan", &self.progressive_plan)
            .field("json_retries", &self.json_retries)
            .finish()
    }
}

/// Settle an active plan's terminal status and announce it once.
fn mark_plan_complete(plan: &mut Plan, round: u32, observers: &Observers) {
    if plan.status != PlanStatus::Active {
        return;
    }
    plan.status = plan.outcome();
    info!(round, plan_id = %plan.id, status = plan.status.as_str(), "Plan complete");
    let plan: &Plan = plan;
    observers.notify(|o| o.on_plan_complete(plan));
}

/// A parser that reports `steps[*].<field>` values as step field updates.
fn step_field_parser(observers: &Observers) -> std::result::Result<StreamingJsonParser, ExtractError> {
    let mut parser = StreamingJsonParser::new(ParserOptions::streaming());
    for field in PROGRESSIVE_FIELDS {
        let observers = observers.clone();
        parser.on(&format!("steps[*].{field}"), move |event| {
            let Some(step_index) = event.array_index() else {
                return;
            };
            let update = StepFieldUpdate {
                step_index,
                field: field.to_string(),
                value: event.value.clone(),
                complete: event.complete,
            };
            observers.notify(|o| o.on_step_field(&update));
        })?;
    }
    Ok(parser)
}
