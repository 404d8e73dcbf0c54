//! `thinkloop ask`: one reasoning loop over one message.

use std::io::Write;

use thinkloop_agent::{AgentStreamEvent, ReasoningLoop, RunOptions};
use thinkloop_config::EngineConfig;
use thinkloop_core::{Message, ToolRegistry};

pub async fn run(
    config: &EngineConfig,
    message: String,
    stream: bool,
    max_iterations: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let provider = super::provider(config)?;
    let agent = ReasoningLoop::from_config(config, Some(provider), ToolRegistry::new())?;

    let mut options = RunOptions::new().with_cancellation(super::cancel_on_ctrl_c());
    if let Some(max) = max_iterations {
        options = options.with_max_iterations(max);
    }
    let messages = vec![Message::user(message)];

    if !stream {
        eprint!("  Thinking...");
        let result = agent.invoke(messages, options).await;
        eprint!("\r              \r");
        let result = result?;
        println!("{}", result.answer.content);
        if result.limit_reached {
            eprintln!("  (stopped after {} iterations)", result.iterations);
        }
        return Ok(());
    }

    let mut events = agent.stream(messages, options);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            AgentStreamEvent::Thought { content, action, .. } => {
                eprintln!("  [{action}] {content}");
            }
            AgentStreamEvent::ToolCall { name, input, .. } => {
                eprintln!("  -> {name} {input}");
            }
            AgentStreamEvent::ToolResult { name, output, .. } => {
                eprintln!("  <- {name}: {output}");
            }
            AgentStreamEvent::Done { answer, iterations, .. } => {
                println!("{answer}");
                stdout.flush()?;
                eprintln!("  ({iterations} iterations)");
            }
            AgentStreamEvent::Error { message, stage } => {
                let stage = stage.unwrap_or_else(|| "unknown".into());
                return Err(format!("failed in {stage}: {message}").into());
            }
            _ => {}
        }
    }
    Ok(())
}
