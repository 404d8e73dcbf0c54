pub mod ask;
pub mod config_cmd;
pub mod extract;
pub mod orchestrate;

use std::sync::Arc;

use thinkloop_agent::CancellationToken;
use thinkloop_config::EngineConfig;
use thinkloop_core::Provider;

/// Build the configured provider, explaining how to set a key when none is found.
pub fn provider(config: &EngineConfig) -> Result<Arc<dyn Provider>, Box<dyn std::error::Error>> {
    if let Some(provider) = thinkloop_providers::build_from_config(config) {
        return Ok(provider);
    }

    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    THINKLOOP_API_KEY=sk-...");
    eprintln!("    OPENAI_API_KEY=sk-...");
    eprintln!();
    eprintln!("  Or add it to the [provider] section of:");
    eprintln!("    {}", EngineConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}

/// A token cancelled by the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling the run");
            cancel.cancel();
        }
    });
    token
}
