//! `thinkloop orchestrate`: host, plan, specialists, feedback.

use std::io::Write;

use thinkloop_agent::{AgentStreamEvent, Orchestrator, RunOptions};
use thinkloop_config::EngineConfig;
use thinkloop_core::{Message, ToolRegistry};

pub async fn run(
    config: &EngineConfig,
    message: String,
    stream: bool,
    max_rounds: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let provider = super::provider(config)?;
    let orchestrator = Orchestrator::from_config(config, Some(provider), ToolRegistry::new())?;
    tracing::info!(
        specialists = orchestrator.specialists().len(),
        max_rounds = orchestrator.max_rounds(),
        "Orchestrator ready"
    );

    let mut options = RunOptions::new().with_cancellation(super::cancel_on_ctrl_c());
    if let Some(max) = max_rounds {
        options = options.with_max_rounds(max);
    }
    let messages = vec![Message::user(message)];

    if !stream {
        let result = orchestrator.invoke(messages, options).await?;
        println!("{}", result.answer.content);
        if result.rounds > 0 {
            eprintln!(
                "  ({} rounds, {} steps)",
                result.rounds,
                result.plan.as_ref().map(|p| p.steps.len()).unwrap_or(0)
            );
        }
        return Ok(());
    }

    let mut events = orchestrator.stream(messages, options);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        match render(&event) {
            Output::Answer(text) => {
                print!("{text}");
                stdout.flush()?;
            }
            Output::Status(line) => eprintln!("{line}"),
            Output::Failed(message) => return Err(message.into()),
            Output::Nothing => {}
        }
    }
    println!();
    Ok(())
}

/// Where one stream event goes on the terminal.
#[derive(Debug, PartialEq)]
enum Output {
    /// Answer text, printed to stdout as it arrives.
    Answer(String),
    /// Progress, printed to stderr.
    Status(String),
    Failed(String),
    Nothing,
}

fn render(event: &AgentStreamEvent) -> Output {
    match event {
        AgentStreamEvent::Stage { stage } if stage != "end" => Output::Status(format!("[{stage}]")),
        AgentStreamEvent::Chunk { stage, content }
            if stage == "direct_answer" || stage == "final_answer" =>
        {
            Output::Answer(content.clone())
        }
        AgentStreamEvent::Plan { plan } => Output::Status(plan.render().trim_end().to_string()),
        AgentStreamEvent::StepField {
            step_index,
            field,
            value,
            complete: true,
        } => Output::Status(format!(
            "  step {step_index} {field}: {}",
            value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
        )),
        AgentStreamEvent::StepStatus { step_id, status } => {
            Output::Status(format!("  {step_id} -> {status}"))
        }
        AgentStreamEvent::PlanComplete { version, status, .. } => {
            Output::Status(format!("  plan v{version} {}", status.as_str()))
        }
        AgentStreamEvent::Feedback { feedback } => Output::Status(format!(
            "  feedback: quality {:.2}, completed {}, needs update {}",
            feedback.quality, feedback.completed, feedback.needs_update
        )),
        AgentStreamEvent::Done { iterations, .. } => Output::Status(format!("  ({iterations} rounds)")),
        AgentStreamEvent::Error { message, stage } => Output::Failed(match stage {
            Some(stage) => format!("failed in {stage}: {message}"),
            None => message.clone(),
        }),
        _ => Output::Nothing,
    }
}
