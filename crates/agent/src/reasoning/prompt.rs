//! Prompt text for the reasoning loop.

use thinkloop_core::ToolRegistry;

/// Final answer used when the iteration limit fires.
pub const MAX_ITERATIONS_MESSAGE: &str =
    "I was unable to reach a final answer within the allowed number of reasoning steps.";

/// Final answer used when a run completes with nothing to say.
pub const APOLOGY_MESSAGE: &str = "I'm sorry, but I could not produce an answer to that request.";

const OUTPUT_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:

{
  "thought": "your reasoning about what to do next",
  "action": "continue" | "tool_call" | "final_answer",
  "tool_calls": [{"name": "tool name", "arguments": {}}],
  "final_answer": "the answer for the user, when action is final_answer",
  "confidence": 0.0
}

- Use "continue" to keep thinking without acting.
- Use "tool_call" to invoke one or more tools; their results are returned to you.
- Use "final_answer" once you can answer; put the complete answer in "final_answer".
- "confidence" is a number between 0 and 1."#;

/// Build the system prompt for one reasoning step.
pub fn system_prompt(base: Option<&str>, tools: &ToolRegistry) -> String {
    let mut prompt = String::new();
    match base {
        Some(base) if !base.trim().is_empty() => prompt.push_str(base.trim()),
        _ => prompt.push_str("You are a careful assistant that reasons step by step."),
    }
    prompt.push_str("\n\n");
    prompt.push_str(OUTPUT_CONTRACT);

    let definitions = tools.definitions();
    if definitions.is_empty() {
        prompt.push_str("\n\nNo tools are available; never use the \"tool_call\" action.");
    } else {
        prompt.push_str("\n\nAvailable tools:\n");
        for def in definitions {
            prompt.push_str(&format!(
                "- {}: {} (arguments schema: {})\n",
                def.name, def.description, def.parameters
            ));
        }
    }
    prompt
}
