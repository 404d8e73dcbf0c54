//! Host prompts for each orchestration stage.

use std::collections::BTreeMap;

use thinkloop_core::{Message, Role, render_transcript};

use super::analysis::ConversationAnalysis;
use super::feedback::Feedback;
use crate::plan::{Plan, PlanStep, StepResult};
use crate::specialist::Specialist;

pub const ANALYSIS_SYSTEM: &str = r#"You analyse conversations before any work is done on them.
Respond with a single JSON object and nothing else:
{"intent": "what the user wants", "topics": ["topic"], "complexity": "simple" | "moderate" | "complex" | "very_complex", "context_summary": "relevant context"}
A request is "simple" when one direct reply can answer it without research, tools or several steps."#;

pub const DIRECT_SYSTEM: &str = "Answer the user's latest message directly and concisely.";

pub const FEEDBACK_SYSTEM: &str = r#"You review the work done so far on a user's request.
Respond with a single JSON object and nothing else:
{"completed": true | false, "quality": 0.0, "needs_update": true | false, "issues": ["problem"], "suggestions": ["improvement"], "confidence": 0.0, "reason": "why"}
Set "completed" when the results are enough to answer the request. Set "needs_update" only when the plan itself is wrong or missing steps. Scores are between 0 and 1."#;

pub const UPDATE_SYSTEM: &str = r#"You revise execution plans.
Respond with a single JSON object and nothing else:
{"operations": [
  {"op": "add", "step": {"id": "new_id", "name": "...", "description": "...", "specialist": "...", "priority": 1, "dependencies": []}},
  {"op": "modify", "step_id": "existing_id", "description": "..."},
  {"op": "remove", "step_id": "existing_id"}
]}
Completed steps cannot be modified. Running steps cannot be removed."#;

pub const FINAL_SYSTEM: &str =
    "Write the final answer to the user's request from the plan and the collected results. \
     Answer the user directly; do not describe the process.";

/// System prompt for plan creation, listing the specialists to assign.
pub fn plan_system(specialists: &[Specialist]) -> String {
    let mut prompt = String::from(
        r#"You break requests into a plan of steps for specialists.
Respond with a single JSON object and nothing else:
{"name": "plan name", "description": "goal", "steps": [
  {"id": "step_1", "name": "short name", "description": "what to do", "specialist": "specialist name", "priority": 1, "dependencies": [], "parameters": {}}
]}
List steps in the order they should run. "dependencies" holds ids of steps that must finish first.
"#,
    );
    if specialists.is_empty() {
        prompt.push_str("\nNo specialists are registered; use \"general\" as the specialist.");
    } else {
        prompt.push_str("\nAvailable specialists:\n");
        for specialist in specialists {
            prompt.push_str(&format!("- {}: {}\n", specialist.name(), specialist.description()));
        }
    }
    prompt
}

pub fn analysis_request(messages: &[Message]) -> String {
    format!("Conversation:\n{}", render_transcript(messages))
}

pub fn plan_request(question: &str, analysis: Option<&ConversationAnalysis>) -> String {
    let mut out = format!("Request: {question}\n");
    if let Some(analysis) = analysis {
        out.push_str(&format!(
            "Intent: {}\nTopics: {}\nComplexity: {}\nContext: {}\n",
            analysis.intent,
            analysis.topics.join(", "),
            analysis.complexity.as_str(),
            analysis.context_summary
        ));
    }
    out
}

/// Messages handed to a specialist: the conversation without system
/// prompts, then one instruction for the step.
pub fn step_messages(conversation: &[Message], plan: &Plan, step: &PlanStep) -> Vec<Message> {
    let mut messages: Vec<Message> = conversation
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();

    let mut instruction = format!(
        "You are working on step '{}' of the plan '{}'.\nTask: {}\n",
        step.name, plan.name, step.description
    );
    if !step.parameters.is_empty() {
        instruction.push_str(&format!(
            "Parameters: {}\n",
            serde_json::Value::Object(step.parameters.clone())
        ));
    }
    for dep in &step.dependencies {
        if let Some(result) = plan.step(dep).and_then(|s| s.result.as_ref()) {
            instruction.push_str(&format!("Result of step '{dep}':\n{}\n", result.output.content));
        }
    }
    messages.push(Message::user(instruction));
    messages
}

/// One message summarising the round's step results, in plan order.
pub fn round_summary(round: u32, plan: Option<&Plan>, results: &BTreeMap<String, StepResult>) -> String {
    let mut out = format!("Results of round {round}:\n");
    if results.is_empty() {
        out.push_str("No specialist produced a result this round.\n");
        return out;
    }

    let order: Vec<&str> = match plan {
        Some(plan) => plan
            .steps
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| results.contains_key(*id))
            .collect(),
        None => results.keys().map(String::as_str).collect(),
    };
    for id in order {
        let Some(result) = results.get(id) else {
            continue;
        };
        let specialist = result
            .output
            .metadata
            .get("specialist")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        out.push_str(&format!(
            "## {id} ({specialist}, {}, confidence {:.2})\n{}\n",
            if result.success { "succeeded" } else { "failed" },
            result.confidence,
            result.output.content
        ));
    }
    out
}

pub fn feedback_request(question: &str, plan: Option<&Plan>, summary: &str) -> String {
    let plan = plan.map(Plan::render).unwrap_or_default();
    format!("Request: {question}\n\n{plan}\n{summary}")
}

pub fn update_request(plan: &Plan, feedback: &Feedback) -> String {
    format!(
        "{}\nFeedback: {}\nIssues: {}\nSuggestions: {}",
        plan.render(),
        feedback.reason,
        feedback.issues.join("; "),
        feedback.suggestions.join("; ")
    )
}

pub fn final_request(question: &str, plan: Option<&Plan>, collected: &[Message]) -> String {
    let mut out = format!("Request: {question}\n\n");
    if let Some(plan) = plan {
        out.push_str(&plan.render());
        out.push('\n');
    }
    for message in collected {
        out.push_str(&message.content);
        out.push('\n');
    }
    out
}

/// Re-prompt after a reply that did not parse.
pub fn repair_request(error: &str) -> String {
    format!(
        "Your previous reply could not be parsed ({error}). \
         Reply again with only the JSON object in the requested format."
    )
}
