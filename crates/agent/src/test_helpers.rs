//! Shared test helpers for controller tests.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use thinkloop_core::error::{ProviderError, ToolError};
use thinkloop_core::message::{Message, MessageToolCall};
use thinkloop_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use thinkloop_core::tool::{Tool, ToolResult};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` or `stream` returns the next response in the
/// queue. Panics if more calls are made than responses provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<ProviderRequest>>,
    chunk_size: usize,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
            chunk_size: 5,
        }
    }

    /// One text response per entry.
    pub fn from_texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| make_text_response(t)).collect())
    }

    /// Split streamed content into chunks of this many characters.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: ProviderRequest) -> ProviderResponse {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        self.requests.lock().unwrap().push(request);
        let response = responses[*count].clone();
        *count += 1;
        response
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(self.next(request))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.next(request);
        let chars: Vec<char> = response.message.content.chars().collect();
        let pieces: Vec<String> = chars
            .chunks(self.chunk_size)
            .map(|c| c.iter().collect())
            .collect();

        let (tx, rx) = tokio::sync::mpsc::channel(pieces.len() + 1);
        for piece in pieces {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(piece),
                    ..Default::default()
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                tool_calls: response.message.tool_calls,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}

/// A provider whose every call fails.
pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::ApiError {
            status_code: 503,
            message: "service unavailable".into(),
        })
    }
}

/// Answers from a script, then hangs on the next call.
///
/// A blocking call sleeps for an hour; a stream sends `partial` and then
/// stays open without finishing. Meant for paused-time tests.
pub struct StallingProvider {
    script: SequentialMockProvider,
    scripted: usize,
    partial: String,
}

impl StallingProvider {
    pub fn new(texts: &[&str], partial: &str) -> Self {
        Self {
            script: SequentialMockProvider::from_texts(texts),
            scripted: texts.len(),
            partial: partial.to_string(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.script.call_count()
    }

    fn stalls(&self) -> bool {
        self.script.call_count() >= self.scripted
    }
}

#[async_trait]
impl Provider for StallingProvider {
    fn name(&self) -> &str {
        "stalling_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        if self.stalls() {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        self.script.complete(request).await
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        if !self.stalls() {
            return self.script.stream(request).await;
        }
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let partial = self.partial.clone();
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(partial),
                    ..Default::default()
                }))
                .await;
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            drop(tx);
        });
        Ok(rx)
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response carrying native tool calls and optional thought content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    let mut response = make_text_response(thought);
    response.message.tool_calls = tool_calls;
    response
}

/// Helper to create a native tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{}", name),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// A reasoning reply choosing `continue`.
pub fn continue_text(thought: &str) -> String {
    json!({"thought": thought, "action": "continue", "confidence": 0.3}).to_string()
}

/// A reasoning reply choosing `final_answer`.
pub fn final_text(answer: &str) -> String {
    json!({
        "thought": "I can answer now",
        "action": "final_answer",
        "final_answer": answer,
        "confidence": 0.9
    })
    .to_string()
}

/// A reasoning reply requesting one tool through the JSON contract.
pub fn tool_call_text(name: &str, args: serde_json::Value) -> String {
    json!({
        "thought": format!("I should use {name}"),
        "action": "tool_call",
        "tool_calls": [{"id": format!("call_{name}"), "name": name, "arguments": args}],
        "confidence": 0.6
    })
    .to_string()
}

/// Echoes its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let text = arguments["text"].as_str().unwrap_or("").to_string();
        Ok(ToolResult::ok("", text))
    }
}

/// Always returns the same output.
pub struct StaticTool {
    pub name: &'static str,
    pub output: &'static str,
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Returns a fixed string"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok("", self.output))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "disk on fire".into(),
        })
    }
}
