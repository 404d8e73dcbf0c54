//! OpenAI-compatible chat-completions provider.
//!
//! Works with any endpoint exposing `/chat/completions`: OpenAI,
//! OpenRouter, Ollama, vLLM, LM Studio and friends.
//!
//! Supports:
//! - Blocking completions
//! - Streaming completions over SSE, with tool-call deltas reassembled
//! - Tool use / function calling

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thinkloop_config::ProviderConfig;
use thinkloop_core::error::ProviderError;
use thinkloop_core::message::{Message, MessageToolCall, Role};
use thinkloop_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage,
};
use tracing::{debug, trace, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// An OpenAI-compatible generation provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build from the `[provider]` configuration section.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("provider.api_key is not set".into()))?;
        Self::new(config.name.clone(), config.base_url.clone(), api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, request: &ProviderRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = request_body(request, stream);
        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream,
            "Sending chat completion request"
        );

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();
        warn!(provider = %self.name, status, body = %body, "Provider returned an error");
        Err(status_error(status, retry_after, body))
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self.post(&request, false).await?;
        let api: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;
        api.into_provider_response()
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.post(&request, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider = self.name.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(next) = bytes.next().await {
                let data = match next {
                    Ok(data) => data,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };
                for chunk in decoder.push(&data) {
                    let done = chunk.done;
                    if tx.send(Ok(chunk)).await.is_err() || done {
                        return;
                    }
                }
            }

            trace!(provider = %provider, "SSE stream closed without [DONE]");
            let _ = tx.send(Ok(decoder.finish())).await;
        });

        Ok(rx)
    }
}

/// The JSON body for one chat-completions call.
fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": request.model,
        "messages": request.messages.iter().map(ApiMessage::from).collect::<Vec<_>>(),
        "temperature": request.temperature,
        "stream": stream,
    });
    if stream {
        body["stream_options"] = serde_json::json!({ "include_usage": true });
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if !request.tools.is_empty() {
        body["tools"] = serde_json::json!(request.tools.iter().map(ApiTool::from).collect::<Vec<_>>());
    }
    body
}

/// Map a non-200 status to a provider error.
fn status_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthenticationFailed(if body.is_empty() {
            "invalid API key or insufficient permissions".into()
        } else {
            body
        }),
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(5),
        },
        408 | 504 => ProviderError::Timeout(body),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

// ── SSE decoding ────────────────────────────────────────────────────────

/// Turns raw SSE bytes into stream chunks.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network reads are decoded intact. Tool-call
/// fragments are accumulated by index and emitted on the final chunk.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, MessageToolCall>,
    finished: bool,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                out.push(self.finish());
                return out;
            }
            match serde_json::from_str::<StreamResponse>(data) {
                Ok(event) => {
                    if let Some(chunk) = self.apply(event) {
                        let done = chunk.done;
                        out.push(chunk);
                        if done {
                            return out;
                        }
                    }
                }
                Err(e) => trace!(data = %data, error = %e, "Ignoring unparseable SSE event"),
            }
        }
        out
    }

    fn apply(&mut self, event: StreamResponse) -> Option<StreamChunk> {
        if let Some(usage) = event.usage {
            let mut chunk = self.finish();
            chunk.usage = Some(usage.into());
            return Some(chunk);
        }

        let choice = event.choices.into_iter().next()?;
        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let call = self.tool_calls.entry(delta.index).or_insert_with(|| MessageToolCall {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
            if let Some(id) = delta.id {
                call.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    call.name = name;
                }
                if let Some(arguments) = function.arguments {
                    call.arguments.push_str(&arguments);
                }
            }
        }

        choice
            .delta
            .content
            .filter(|c| !c.is_empty())
            .map(|content| StreamChunk {
                content: Some(content),
                ..Default::default()
            })
    }

    /// The terminal chunk carrying every accumulated tool call.
    fn finish(&mut self) -> StreamChunk {
        self.finished = true;
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.tool_calls).into_values().collect(),
            done: true,
            usage: None,
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for ApiMessage {
    fn from(m: &Message) -> Self {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let tool_calls = (!m.tool_calls.is_empty()).then(|| {
            m.tool_calls
                .iter()
                .map(|call| ApiToolCall {
                    id: call.id.clone(),
                    r#type: "function".into(),
                    function: ApiFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect()
        });
        Self {
            role: role.into(),
            content: Some(m.content.clone()),
            tool_calls,
            tool_call_id: m.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    r#type: &'static str,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolDefinition> for ApiTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: ApiToolFunction {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

impl ApiResponse {
    fn into_provider_response(self) -> Result<ProviderResponse, ProviderError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let mut message = Message::assistant(choice.message.content.unwrap_or_default());
        message.tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| MessageToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(ProviderResponse {
            message,
            usage: self.usage.map(Usage::from),
            model: self.model,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
