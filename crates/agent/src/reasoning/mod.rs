//! Reasoning Loop Controller: think → decide → act → observe.
//!
//! ```text
//! Init → Reasoning → Decision ─┬─ tool_call ──→ Tools → ToolsChecker ─┬─→ Reasoning
//!            ▲                 │                                      └─→ Complete
//!            ├──── continue ───┤
//!            │                 └─ final_answer ─────────────────────────→ Complete
//!            └──────────────── (tool_call without calls)
//! ```
//!
//! Every stage is a method returning the next [`ReasoningStage`]; the run
//! loop owns the [`AgentRunState`] and hands it to one stage at a time.
//! Termination is structural: once the iteration counter exceeds the limit
//! the Decision stage forces a fixed final answer.

pub mod decision;
pub mod prompt;
pub mod state;

pub use decision::{Action, ReasoningDecision};
pub use state::{AgentRunState, ReasoningStage};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use thinkloop_config::{DEFAULT_MAX_ITERATIONS, EngineConfig, positive_or_default};
use thinkloop_core::{
    Error, Message, MessageStore, MessageToolCall, Provider, ProviderRequest, Result, ToolError,
    ToolRegistry, ToolResult,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::{cancellable, check_cancelled, recv_cancellable};
use crate::observer::{ChannelObserver, Observers};
use crate::options::RunOptions;
use crate::stream_event::AgentStreamEvent;
use decision::to_message_call;
use prompt::{APOLOGY_MESSAGE, MAX_ITERATIONS_MESSAGE};

/// A single-agent reasoning loop bound to a provider, a model and a tool set.
///
/// Cheap to clone; clones share the provider, tools and store.
#[derive(Clone)]
pub struct ReasoningLoop {
    /// Name used in logs and message metadata.
    name: String,
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    tools: ToolRegistry,
    /// Tools whose result ends the run.
    return_direct: BTreeSet<String>,
    max_iterations: u32,
    store: Option<Arc<dyn MessageStore>>,
}

/// The outcome of one reasoning loop invocation.
#[derive(Debug, Clone)]
pub struct ReasoningResult {
    /// The final answer.
    pub answer: Message,
    /// Every decision, in order.
    pub history: Vec<ReasoningDecision>,
    /// Input messages, model responses and tool results.
    pub transcript: Vec<Message>,
    /// Generation calls made.
    pub iterations: u32,
    pub tool_calls_made: usize,
    /// Whether the run ended on the iteration-limit fallback.
    pub limit_reached: bool,
}

impl ReasoningResult {
    /// Confidence of the last decision, or 0 when the limit fired.
    pub fn confidence(&self) -> f32 {
        if self.limit_reached {
            return 0.0;
        }
        self.history.last().map(|d| d.confidence).unwrap_or(0.0)
    }
}

impl ReasoningLoop {
    /// Create a new reasoning loop.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            name: "agent".into(),
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: None,
            tools,
            return_direct: BTreeSet::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            store: None,
        }
    }

    /// Build from configuration.
    ///
    /// A missing provider is fatal here; everything else has a default.
    pub fn from_config(
        config: &EngineConfig,
        provider: Option<Arc<dyn Provider>>,
        tools: ToolRegistry,
    ) -> Result<Self> {
        let provider = provider.ok_or_else(|| {
            Error::config("no generation provider configured (set provider.api_key or THINKLOOP_API_KEY)")
        })?;

        let mut agent = Self::new(provider, config.provider.model.clone(), tools)
            .with_temperature(config.provider.temperature)
            .with_max_iterations(config.reasoning.max_iterations);
        if let Some(max_tokens) = config.provider.max_tokens {
            agent = agent.with_max_tokens(max_tokens);
        }
        for name in &config.reasoning.return_direct {
            agent = agent.with_return_direct(name)?;
        }
        Ok(agent)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set max iterations. Zero is corrected to the default.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = positive_or_default("max_iterations", max, DEFAULT_MAX_ITERATIONS);
        self
    }

    /// Register a tool whose result becomes the final answer.
    ///
    /// Fails with a configuration error if no such tool is registered.
    pub fn with_return_direct(mut self, tool: impl Into<String>) -> Result<Self> {
        let tool = tool.into();
        if !self.tools.contains(&tool) {
            return Err(Error::config(format!(
                "return-directly tool '{tool}' is not registered (registered: {:?})",
                self.tools.names()
            )));
        }
        self.return_direct.insert(tool);
        Ok(self)
    }

    /// Attach a store that receives finalized transcripts.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the loop to completion.
    pub async fn invoke(&self, messages: Vec<Message>, options: RunOptions) -> Result<ReasoningResult> {
        self.run(messages, &options, false).await
    }

    /// Run the loop on a spawned task, yielding events as they happen.
    ///
    /// The last event is always `Done` or `Error`. Must be called from
    /// within a Tokio runtime.
    pub fn stream(
        &self,
        messages: Vec<Message>,
        options: RunOptions,
    ) -> mpsc::UnboundedReceiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = self.clone();

        tokio::spawn(async move {
            let mut options = options;
            options
                .observers
                .push(Arc::new(ChannelObserver::new(tx.clone())));

            let event = match agent.run(messages, &options, true).await {
                Ok(result) => AgentStreamEvent::Done {
                    conversation_id: options.conversation_id.clone(),
                    answer: result.answer.content,
                    iterations: result.iterations as usize,
                    tool_calls_made: result.tool_calls_made,
                },
                Err(e) => {
                    warn!(agent = %agent.name, error = %e, "Reasoning stream failed");
                    AgentStreamEvent::from_error(&e)
                }
            };
            let _ = tx.send(event);
        });

        rx
    }

    /// One raw generation call without the reasoning contract or tools.
    pub async fn generate(&self, messages: Vec<Message>, options: &RunOptions) -> Result<Message> {
        let mut ignore = |_: &str| {};
        self.call_model(self.request(messages), false, &options.cancellation, &mut ignore)
            .await
    }

    pub(crate) async fn run(
        &self,
        messages: Vec<Message>,
        options: &RunOptions,
        streaming: bool,
    ) -> Result<ReasoningResult> {
        let observers = Observers::new(&options.observers);
        let max_iterations = options
            .max_iterations
            .map(|n| positive_or_default("max_iterations", n, DEFAULT_MAX_ITERATIONS))
            .unwrap_or(self.max_iterations);

        let mut state = AgentRunState::new(max_iterations);
        let mut input = Some(messages);
        let mut stage = ReasoningStage::Init;

        loop {
            check_cancelled(&options.cancellation)?;
            observers.notify(|o| o.on_stage(stage.as_str()));
            debug!(agent = %self.name, stage = %stage, iteration = state.iteration, "Reasoning stage");

            let current = stage;
            stage = match current {
                ReasoningStage::Init => {
                    state.seed(input.take().unwrap_or_default());
                    ReasoningStage::Reasoning
                }
                ReasoningStage::Reasoning => self
                    .reason(&mut state, options, &observers, streaming)
                    .await
                    .map_err(|e| e.in_stage(current.as_str()))?,
                ReasoningStage::Decision => self.decide(&mut state),
                ReasoningStage::Tools => self
                    .run_tools(&mut state, options, &observers)
                    .await
                    .map_err(|e| e.in_stage(current.as_str()))?,
                ReasoningStage::ToolsChecker => self.check_return_direct(&mut state),
                ReasoningStage::Complete => break,
            };
        }

        let answer = self.resolve_answer(&state);
        info!(
            agent = %self.name,
            iterations = state.iteration,
            tool_calls = state.tool_calls_made,
            limit_reached = state.limit_reached,
            "Reasoning loop complete"
        );
        observers.notify(|o| o.on_complete(&answer));
        self.persist(options, &state.transcript, &answer).await;

        Ok(ReasoningResult {
            answer,
            history: state.history,
            transcript: state.transcript,
            iterations: state.iteration,
            tool_calls_made: state.tool_calls_made,
            limit_reached: state.limit_reached,
        })
    }

    // ── Stages ──────────────────────────────────────────────────────────

    async fn reason(
        &self,
        state: &mut AgentRunState,
        options: &RunOptions,
        observers: &Observers,
        streaming: bool,
    ) -> Result<ReasoningStage> {
        let mut messages = Vec::with_capacity(state.transcript.len() + 1);
        messages.push(Message::system(prompt::system_prompt(
            self.system_prompt.as_deref(),
            &self.tools,
        )));
        messages.extend(state.transcript.iter().cloned());

        let mut request = self.request(messages);
        request.tools = self.tools.definitions();

        state.iteration += 1;
        let mut forward = |delta: &str| {
            if streaming {
                observers.notify(|o| o.on_chunk(ReasoningStage::Reasoning.as_str(), delta));
            }
        };
        let mut response = self
            .call_model(request, streaming, &options.cancellation, &mut forward)
            .await?;

        let mut decision = ReasoningDecision::parse(&response);
        if options.force_final_answer {
            decision.force_final(&response.content);
            response.tool_calls.clear();
        }
        // Keep JSON-contract tool calls on the message so the following tool
        // results have a call to answer.
        if !response.has_tool_calls() && !decision.tool_calls.is_empty() {
            response.tool_calls = decision.tool_calls.iter().map(to_message_call).collect();
        }

        info!(
            agent = %self.name,
            iteration = state.iteration,
            action = decision.action.as_str(),
            tool_calls = decision.tool_calls.len(),
            confidence = decision.confidence,
            "Reasoning decision"
        );
        observers.notify(|o| o.on_thought(&decision));
        state.history.push(decision);
        state.transcript.push(response.with_metadata("agent", self.name.clone()));
        Ok(ReasoningStage::Decision)
    }

    fn decide(&self, state: &mut AgentRunState) -> ReasoningStage {
        if state.iteration > state.max_iterations {
            warn!(
                agent = %self.name,
                iteration = state.iteration,
                max_iterations = state.max_iterations,
                "Iteration limit reached, forcing final answer"
            );
            state.final_answer = Some(MAX_ITERATIONS_MESSAGE.to_string());
            state.limit_reached = true;
            state.completed = true;
            return ReasoningStage::Complete;
        }

        let Some(decision) = state.history.last() else {
            return ReasoningStage::Reasoning;
        };
        match decision.action {
            Action::ToolCall if !decision.tool_calls.is_empty() => ReasoningStage::Tools,
            Action::FinalAnswer => {
                let answer = decision.final_answer.clone();
                state.final_answer = answer;
                state.completed = true;
                ReasoningStage::Complete
            }
            Action::ToolCall | Action::Continue => ReasoningStage::Reasoning,
        }
    }

    async fn run_tools(
        &self,
        state: &mut AgentRunState,
        options: &RunOptions,
        observers: &Observers,
    ) -> Result<ReasoningStage> {
        let calls = state
            .history
            .last()
            .map(|d| d.tool_calls.clone())
            .unwrap_or_default();

        for call in calls {
            observers.notify(|o| o.on_tool_call(&call));
            let started = Instant::now();
            let outcome = cancellable(&options.cancellation, async {
                self.tools.execute(&call).await.map_err(Error::from)
            })
            .await;

            let result = match outcome {
                Ok(result) => result,
                // The model invented a tool; tell it instead of failing the run.
                Err(Error::Tool(ToolError::NotFound(name))) => {
                    warn!(agent = %self.name, tool = %name, "Model requested an unknown tool");
                    ToolResult {
                        call_id: call.id.clone(),
                        success: false,
                        output: format!(
                            "Error: there is no tool named '{name}'. Available tools: {}",
                            self.tools.names().join(", ")
                        ),
                        data: None,
                    }
                }
                Err(e) => return Err(e),
            };

            let elapsed = started.elapsed();
            info!(
                agent = %self.name,
                tool = %call.name,
                success = result.success,
                duration_ms = elapsed.as_millis() as u64,
                "Tool executed"
            );
            state.tool_calls_made += 1;
            observers.notify(|o| o.on_tool_result(&call, &result, elapsed));
            state
                .transcript
                .push(Message::tool_result(call.id.clone(), result.output));

            if self.return_direct.contains(&call.name) && state.return_direct_call.is_none() {
                state.return_direct_call = Some(call.id.clone());
            }
        }

        Ok(ReasoningStage::ToolsChecker)
    }

    fn check_return_direct(&self, state: &mut AgentRunState) -> ReasoningStage {
        let Some(call_id) = state.return_direct_call.take() else {
            return ReasoningStage::Reasoning;
        };
        info!(agent = %self.name, call_id = %call_id, "Return-directly tool ends the run");
        state.final_answer = state.tool_output(&call_id).map(str::to_string);
        state.completed = true;
        ReasoningStage::Complete
    }

    fn resolve_answer(&self, state: &AgentRunState) -> Message {
        let text = state
            .final_answer
            .clone()
            .or_else(|| state.transcript.last().map(|m| m.content.clone()))
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| APOLOGY_MESSAGE.to_string());
        Message::assistant(text).with_metadata("agent", self.name.clone())
    }

    async fn persist(&self, options: &RunOptions, transcript: &[Message], answer: &Message) {
        let (Some(store), Some(conversation_id)) = (&self.store, &options.conversation_id) else {
            return;
        };
        let mut messages = transcript.to_vec();
        messages.push(answer.clone());
        if let Err(e) = store.append(conversation_id, &messages).await {
            warn!(
                conversation_id = %conversation_id,
                store = store.name(),
                error = %e,
                "Failed to append transcript to message store"
            );
        }
    }

    // ── Generation ──────────────────────────────────────────────────────

    pub(crate) fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        let mut request = ProviderRequest::new(self.model.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }

    /// Call the provider once, blocking or streamed.
    ///
    /// `on_delta` sees every piece of text as it arrives (the whole content
    /// once in blocking mode). Streamed tool-call deltas are merged by id.
    pub(crate) async fn call_model(
        &self,
        request: ProviderRequest,
        streaming: bool,
        cancel: &CancellationToken,
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Result<Message> {
        let started = Instant::now();

        if !streaming {
            let response = cancellable(cancel, async {
                self.provider.complete(request).await.map_err(Error::from)
            })
            .await?;
            debug!(
                agent = %self.name,
                provider = self.provider.name(),
                model = %response.model,
                tokens = response.usage.map(|u| u.total_tokens).unwrap_or(0),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generation complete"
            );
            if !response.message.content.is_empty() {
                on_delta(&response.message.content);
            }
            return Ok(response.message);
        }

        let mut request = request;
        request.stream = true;
        let mut rx = cancellable(cancel, async {
            self.provider.stream(request).await.map_err(Error::from)
        })
        .await?;

        let mut content = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();
        while let Some(chunk) = recv_cancellable(cancel, &mut rx).await? {
            let chunk = chunk?;
            if let Some(text) = chunk.content.as_deref()
                && !text.is_empty()
            {
                content.push_str(text);
                on_delta(text);
            }
            for delta in chunk.tool_calls {
                merge_tool_call(&mut tool_calls, delta);
            }
            if chunk.done {
                break;
            }
        }
        debug!(
            agent = %self.name,
            provider = self.provider.name(),
            chars = content.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stream complete"
        );

        let mut message = Message::assistant(content);
        message.tool_calls = tool_calls;
        Ok(message)
    }
}

impl std::fmt::Debug for ReasoningLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningLoop")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("tools", &self.tools)
            .field("return_direct", &self.return_direct)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

fn merge_tool_call(calls: &mut Vec<MessageToolCall>, delta: MessageToolCall) {
    match calls.iter_mut().find(|c| c.id == delta.id) {
        Some(existing) => {
            if existing.name.is_empty() {
                existing.name = delta.name;
            }
            existing.arguments.push_str(&delta.arguments);
        }
        None => calls.push(delta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RunObserver;
    use crate::test_helpers::*;
    use std::sync::Mutex;
    use thinkloop_core::{InMemoryMessageStore, Role};

    fn agent_with(provider: Arc<SequentialMockProvider>, tools: ToolRegistry) -> ReasoningLoop {
        ReasoningLoop::new(provider, "mock-model", tools)
    }

    fn tools() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(StaticTool {
            name: "lookup",
            output: "Paris",
        }));
        registry.register(Arc::new(FailingTool));
        registry
    }

    #[tokio::test]
    async fn final_answer_on_first_iteration() {
        let provider = Arc::new(SequentialMockProvider::from_texts(&[&final_text("42")]));
        let agent = agent_with(provider.clone(), ToolRegistry::new());

        let result = agent
            .invoke(vec![Message::user("What is 6*7?")], RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.answer.content, "42");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.tool_calls_made, 0);
        assert!(!result.limit_reached);
        assert_eq!(provider.call_count(), 1);
        // The reasoning contract is sent as the system prompt.
        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("final_answer"));
    }

    #[tokio::test]
    async fn always_continue_terminates_after_limit_plus_one() {
        for limit in 1..=4u32 {
            let replies: Vec<String> = (0..=limit).map(|i| continue_text(&format!("step {i}"))).collect();
            let replies: Vec<&str> = replies.iter().map(String::as_str).collect();
            let provider = Arc::new(SequentialMockProvider::from_texts(&replies));
            let agent = agent_with(provider.clone(), ToolRegistry::new()).with_max_iterations(limit);

            let result = agent
                .invoke(vec![Message::user("loop")], RunOptions::default())
                .await
                .unwrap();

            assert_eq!(result.answer.content, MAX_ITERATIONS_MESSAGE);
            assert_eq!(result.iterations, limit + 1);
            assert_eq!(provider.call_count() as u32, limit + 1);
            assert!(result.limit_reached);
            assert_eq!(result.confidence(), 0.0);
        }
    }

    #[tokio::test]
    async fn unparseable_output_keeps_reasoning() {
        let provider = Arc::new(SequentialMockProvider::from_texts(&[
            "hmm, let me think",
            &final_text("done"),
        ]));
        let agent = agent_with(provider, ToolRegistry::new());
        let result = agent
            .invoke(vec![Message::user("q")], RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.history[0].action, Action::Continue);
        assert_eq!(result.history[0].thought, "hmm, let me think");
        assert_eq!(result.answer.content, "done");
        assert_eq!(result.iterations, 2);
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(
                vec![make_tool_call("echo", serde_json::json!({"text": "ping"}))],
                "checking",
            ),
            make_text_response(&final_text("pong")),
        ]));
        let agent = agent_with(provider.clone(), tools());

        let result = agent
            .invoke(vec![Message::user("echo ping")], RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.answer.content, "pong");
        assert_eq!(result.tool_calls_made, 1);
        let tool_msg = result
            .transcript
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.content, "ping");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_echo"));
        // The second request carries the tool result.
        assert!(provider.requests()[1]
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content == "ping"));
    }

    #[tokio::test]
    async fn return_direct_short_circuits() {
        let provider = Arc::new(SequentialMockProvider::from_texts(&[&tool_call_text(
            "lookup",
            serde_json::json!({"city": "France"}),
        )]));
        let agent = agent_with(provider.clone(), tools())
            .with_max_iterations(10)
            .with_return_direct("lookup")
            .unwrap();

        let result = agent
            .invoke(vec![Message::user("capital of France?")], RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.answer.content, "Paris");
        assert_eq!(result.iterations, 1);
        assert_eq!(provider.call_count(), 1);
        // The JSON-contract call is mirrored onto the assistant message.
        let assistant = result
            .transcript
            .iter()
            .find(|m| m.role == Role::Assistant)
            .unwrap();
        assert_eq!(assistant.tool_calls[0].id, "call_lookup");
    }

    #[test]
    fn return_direct_requires_registered_tool() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let err = agent_with(provider, tools())
            .with_return_direct("teleport")
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("teleport"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let provider = Arc::new(SequentialMockProvider::from_texts(&[
            &tool_call_text("teleport", serde_json::json!({})),
            &final_text("cannot teleport"),
        ]));
        let agent = agent_with(provider, tools());

        let result = agent
            .invoke(vec![Message::user("beam me up")], RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.answer.content, "cannot teleport");
        let observation = result
            .transcript
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(observation.content.contains("no tool named 'teleport'"));
    }

    #[tokio::test]
    async fn tool_failure_aborts_with_stage() {
        let provider = Arc::new(SequentialMockProvider::from_texts(&[&tool_call_text(
            "broken",
            serde_json::json!({}),
        )]));
        let agent = agent_with(provider, tools());

        let err = agent
            .invoke(vec![Message::user("break it")], RunOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some("tools"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn provider_failure_aborts_with_stage() {
        let agent = ReasoningLoop::new(Arc::new(FailingProvider), "m", ToolRegistry::new());
        let err = agent
            .invoke(vec![Message::user("hi")], RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some("reasoning"));
        assert!(matches!(err.root(), Error::Provider(_)));
    }

    #[tokio::test]
    async fn tool_call_action_without_calls_reasons_again() {
        let provider = Arc::new(SequentialMockProvider::from_texts(&[
            r#"{"thought": "use a tool", "action": "tool_call"}"#,
            &final_text("ok"),
        ]));
        let agent = agent_with(provider.clone(), tools());
        let result = agent
            .invoke(vec![Message::user("q")], RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.answer.content, "ok");
        assert_eq!(result.tool_calls_made, 0);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn force_final_answer_overrides_tool_call() {
        let provider = Arc::new(SequentialMockProvider::from_texts(&[&tool_call_text(
            "echo",
            serde_json::json!({"text": "x"}),
        )]));
        let agent = agent_with(provider, tools());

        let result = agent
            .invoke(
                vec![Message::user("q")],
                RunOptions::default().with_force_final_answer(true),
            )
            .await
            .unwrap();

        assert_eq!(result.answer.content, "I should use echo");
        assert_eq!(result.tool_calls_made, 0);
        assert!(result.history[0].tool_calls.is_empty());
    }

    #[tokio::test]
    async fn zero_iteration_override_uses_default() {
        let provider = Arc::new(SequentialMockProvider::from_texts(&[&final_text("x")]));
        let agent = agent_with(provider, ToolRegistry::new()).with_max_iterations(0);
        assert_eq!(agent.max_iterations(), DEFAULT_MAX_ITERATIONS);
    }

    #[test]
    fn from_config_without_provider_is_fatal() {
        let config = EngineConfig::default();
        let err = ReasoningLoop::from_config(&config, None, ToolRegistry::new()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn cancelled_run_returns_cancelled() {
        let provider = Arc::new(SequentialMockProvider::from_texts(&[&final_text("x")]));
        let agent = agent_with(provider.clone(), ToolRegistry::new());
        let token = CancellationToken::new();
        token.cancel();

        let err = agent
            .invoke(
                vec![Message::user("q")],
                RunOptions::default().with_cancellation(token),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_generation_commits_nothing() {
        let provider = Arc::new(StallingProvider::new(
            &[&tool_call_text("echo", serde_json::json!({"text": "hi"}))],
            "",
        ));
        let store = Arc::new(InMemoryMessageStore::new());
        let agent = ReasoningLoop::new(provider.clone(), "mock-model", tools()).with_store(store.clone());

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = agent
            .invoke(
                vec![Message::user("q")],
                RunOptions::default()
                    .with_cancellation(token)
                    .with_conversation_id("conv-cancel"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err.root(), Error::Cancelled));
        // The tool round finished; the second generation call was abandoned.
        assert_eq!(provider.call_count(), 1);
        assert!(store.load("conv-cancel").await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn transcript_is_stored_after_success() {
        let store = Arc::new(InMemoryMessageStore::new());
        let provider = Arc::new(SequentialMockProvider::from_texts(&[&final_text("stored")]));
        let agent = agent_with(provider, ToolRegistry::new()).with_store(store.clone());

        agent
            .invoke(
                vec![Message::user("remember me")],
                RunOptions::default().with_conversation_id("conv-1"),
            )
            .await
            .unwrap();

        let saved = store.load("conv-1").await.unwrap();
        assert_eq!(saved.first().unwrap().content, "remember me");
        assert_eq!(saved.last().unwrap().content, "stored");
    }

    #[tokio::test]
    async fn observers_see_stages_and_thoughts() {
        #[derive(Default)]
        struct Log(Mutex<Vec<String>>);
        impl RunObserver for Log {
            fn on_stage(&self, stage: &str) {
                self.0.lock().unwrap().push(format!("stage:{stage}"));
            }
            fn on_thought(&self, decision: &ReasoningDecision) {
                self.0.lock().unwrap().push(format!("thought:{}", decision.action.as_str()));
            }
            fn on_complete(&self, answer: &Message) {
                self.0.lock().unwrap().push(format!("complete:{}", answer.content));
            }
        }

        let log = Arc::new(Log::default());
        let provider = Arc::new(SequentialMockProvider::from_texts(&[&final_text("y")]));
        let agent = agent_with(provider, ToolRegistry::new());
        agent
            .invoke(
                vec![Message::user("q")],
                RunOptions::default().with_observer(log.clone()),
            )
            .await
            .unwrap();

        assert_eq!(
            *log.0.lock().unwrap(),
            vec![
                "stage:init",
                "stage:reasoning",
                "thought:final_answer",
                "stage:decision",
                "stage:complete",
                "complete:y",
            ]
        );
    }

    #[tokio::test]
    async fn stream_forwards_chunks_and_ends_with_done() {
        let reply = final_text("streamed answer");
        let provider = Arc::new(SequentialMockProvider::from_texts(&[&reply]).with_chunk_size(4));
        let agent = agent_with(provider, ToolRegistry::new());

        let mut rx = agent.stream(vec![Message::user("q")], RunOptions::default());
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                AgentStreamEvent::Chunk { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, reply);
        assert!(events.iter().filter(|e| matches!(e, AgentStreamEvent::Chunk { .. })).count() > 1);
        match events.last().unwrap() {
            AgentStreamEvent::Done {
                answer, iterations, ..
            } => {
                assert_eq!(answer, "streamed answer");
                assert_eq!(*iterations, 1);
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_reports_errors_as_last_event() {
        let agent = ReasoningLoop::new(Arc::new(FailingProvider), "m", ToolRegistry::new());
        let mut rx = agent.stream(vec![Message::user("q")], RunOptions::default());
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(AgentStreamEvent::Error { .. })));
    }

    #[test]
    fn merges_streamed_tool_call_deltas() {
        let mut calls = Vec::new();
        merge_tool_call(
            &mut calls,
            MessageToolCall {
                id: "c1".into(),
                name: "echo".into(),
                arguments: "{\"te".into(),
            },
        );
        merge_tool_call(
            &mut calls,
            MessageToolCall {
                id: "c1".into(),
                name: String::new(),
                arguments: "xt\":\"hi\"}".into(),
            },
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, "{\"text\":\"hi\"}");
    }
}
