//! Reasoning decisions: the parsed interpretation of one model response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thinkloop_core::{Message, MessageToolCall, ToolCall};
use tracing::debug;

use crate::json::strip_code_fences;

/// Confidence assumed when the model does not state one.
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// What the model wants to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Continue,
    ToolCall,
    FinalAnswer,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::ToolCall => "tool_call",
            Self::FinalAnswer => "final_answer",
        }
    }

    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "tool_call" | "tool_calls" | "tool" | "use_tool" => Self::ToolCall,
            "final_answer" | "final" | "answer" | "finish" => Self::FinalAnswer,
            _ => Self::Continue,
        }
    }
}

/// One step of the reasoning history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningDecision {
    pub thought: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    /// In `[0, 1]`
    pub confidence: f32,
}

/// The strict output contract the reasoning prompt asks for.
#[derive(Deserialize)]
struct RawDecision {
    #[serde(default)]
    thought: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    final_answer: Option<Value>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

#[derive(Deserialize)]
struct RawToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "tool")]
    name: String,
    #[serde(default, alias = "args", alias = "input")]
    arguments: Value,
}

impl ReasoningDecision {
    /// Interpret a model response.
    ///
    /// Native tool calls win. Otherwise the content is read as the JSON
    /// contract; content that is not valid JSON becomes a `continue`
    /// decision whose thought is the full text.
    pub fn parse(response: &Message) -> Self {
        if response.has_tool_calls() {
            return Self {
                thought: response.content.trim().to_string(),
                action: Action::ToolCall,
                tool_calls: response.tool_calls.iter().map(from_message_call).collect(),
                final_answer: None,
                confidence: DEFAULT_CONFIDENCE,
            };
        }

        let raw: RawDecision = match serde_json::from_str(strip_code_fences(&response.content)) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Reasoning output is not JSON, continuing");
                return Self {
                    thought: response.content.clone(),
                    action: Action::Continue,
                    tool_calls: Vec::new(),
                    final_answer: None,
                    confidence: 0.0,
                };
            }
        };

        let action = raw
            .action
            .as_deref()
            .map(Action::from_label)
            .unwrap_or(Action::Continue);

        let tool_calls = raw
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id.unwrap_or_else(new_call_id),
                name: call.name,
                arguments: call.arguments,
            })
            .collect();

        let final_answer = match raw.final_answer {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
            Some(Value::Null) | None => None,
            Some(Value::String(_)) => None,
            Some(other) => Some(other.to_string()),
        };

        let mut decision = Self {
            thought: raw.thought,
            action,
            tool_calls,
            final_answer,
            confidence: raw
                .confidence
                .map(|c| c.clamp(0.0, 1.0) as f32)
                .unwrap_or(DEFAULT_CONFIDENCE),
        };
        if decision.action == Action::FinalAnswer && decision.final_answer.is_none() {
            decision.final_answer = Some(decision.fallback_answer(&response.content));
        }
        decision
    }

    /// Override a non-final decision into a final answer.
    ///
    /// The answer body prefers the parsed thought, then the raw response
    /// text. Requested tool calls are dropped.
    pub fn force_final(&mut self, raw_text: &str) {
        if self.action != Action::FinalAnswer {
            self.final_answer = Some(self.fallback_answer(raw_text));
            self.action = Action::FinalAnswer;
        }
        self.tool_calls.clear();
    }

    fn fallback_answer(&self, raw_text: &str) -> String {
        if self.thought.trim().is_empty() {
            raw_text.to_string()
        } else {
            self.thought.clone()
        }
    }
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn from_message_call(call: &MessageToolCall) -> ToolCall {
    let arguments = if call.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.arguments).unwrap_or_else(|_| Value::String(call.arguments.clone()))
    };
    ToolCall {
        id: if call.id.is_empty() {
            new_call_id()
        } else {
            call.id.clone()
        },
        name: call.name.clone(),
        arguments,
    }
}

/// Convert a tool call back into the form carried on assistant messages.
pub(crate) fn to_message_call(call: &ToolCall) -> MessageToolCall {
    MessageToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_answer_contract() {
        let msg = Message::assistant(
            r#"```json
{"thought": "easy", "action": "final_answer", "final_answer": "4", "confidence": 0.9}
```"#,
        );
        let decision = ReasoningDecision::parse(&msg);
        assert_eq!(decision.action, Action::FinalAnswer);
        assert_eq!(decision.final_answer.as_deref(), Some("4"));
        assert!((decision.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn invalid_json_degrades_to_continue() {
        let msg = Message::assistant("Let me think about this some more.");
        let decision = ReasoningDecision::parse(&msg);
        assert_eq!(decision.action, Action::Continue);
        assert_eq!(decision.thought, "Let me think about this some more.");
        assert!(decision.tool_calls.is_empty());
    }

    #[test]
    fn native_tool_calls_force_tool_action() {
        let mut msg = Message::assistant(r#"{"action": "final_answer", "final_answer": "x"}"#);
        msg.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: "search".into(),
            arguments: r#"{"q":"rust"}"#.into(),
        }];
        let decision = ReasoningDecision::parse(&msg);
        assert_eq!(decision.action, Action::ToolCall);
        assert_eq!(decision.tool_calls[0].id, "call_1");
        assert_eq!(decision.tool_calls[0].arguments["q"], "rust");
    }

    #[test]
    fn tool_calls_inside_json_are_honoured() {
        let msg = Message::assistant(
            r#"{"thought": "look it up", "action": "tool_call",
                "tool_calls": [{"name": "search", "arguments": {"q": "tokio"}}]}"#,
        );
        let decision = ReasoningDecision::parse(&msg);
        assert_eq!(decision.action, Action::ToolCall);
        assert_eq!(decision.tool_calls.len(), 1);
        assert!(decision.tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn confidence_is_clamped() {
        let msg = Message::assistant(r#"{"thought": "t", "action": "continue", "confidence": 7}"#);
        assert_eq!(ReasoningDecision::parse(&msg).confidence, 1.0);
        let msg = Message::assistant(r#"{"thought": "t", "action": "continue", "confidence": -2}"#);
        assert_eq!(ReasoningDecision::parse(&msg).confidence, 0.0);
    }

    #[test]
    fn final_answer_without_body_uses_thought() {
        let msg = Message::assistant(r#"{"thought": "The answer is 9", "action": "final"}"#);
        let decision = ReasoningDecision::parse(&msg);
        assert_eq!(decision.final_answer.as_deref(), Some("The answer is 9"));
    }

    #[test]
    fn force_final_prefers_thought_then_raw_text() {
        let msg = Message::assistant(
            r#"{"thought": "partial findings", "action": "tool_call", "tool_calls": [{"name": "x"}]}"#,
        );
        let mut decision = ReasoningDecision::parse(&msg);
        decision.force_final(&msg.content);
        assert_eq!(decision.action, Action::FinalAnswer);
        assert_eq!(decision.final_answer.as_deref(), Some("partial findings"));
        assert!(decision.tool_calls.is_empty());

        let msg = Message::assistant(r#"{"action": "continue"}"#);
        let mut decision = ReasoningDecision::parse(&msg);
        decision.force_final(&msg.content);
        assert_eq!(decision.final_answer.as_deref(), Some(msg.content.as_str()));
    }
}
