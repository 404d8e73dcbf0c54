//! thinkloop CLI, the main entry point.
//!
//! Commands:
//! - `ask`          Run one reasoning loop and print the answer
//! - `orchestrate`  Plan, dispatch to specialists, evaluate and answer
//! - `extract`      Stream JSON from stdin through the structured extractor
//! - `config`       Print the default configuration, its path, or validate it

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thinkloop_config::{ConfigError, EngineConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "thinkloop",
    about = "thinkloop: reasoning loops, orchestration graphs and streaming JSON extraction",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Read configuration from this file instead of ~/.thinkloop/config.toml
    #[arg(short, long, global = true, env = "THINKLOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a message with a single reasoning agent
    Ask {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Print model output as it is generated
        #[arg(long)]
        stream: bool,

        /// Override reasoning.max_iterations for this run
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Answer a message with the host and the configured specialists
    Orchestrate {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Print stages, plan steps and feedback as they happen
        #[arg(long)]
        stream: bool,

        /// Override orchestration.max_rounds for this run
        #[arg(long)]
        max_rounds: Option<u32>,
    },

    /// Extract fields from JSON read on stdin
    Extract {
        /// Path pattern such as `steps[*].name` (repeatable)
        #[arg(short, long = "pattern", required = true)]
        patterns: Vec<String>,

        /// Deliver string values while they are still arriving
        #[arg(long)]
        realtime: bool,

        /// With --realtime, deliver only newly arrived text
        #[arg(long)]
        incremental: bool,

        /// Reject text before and after the JSON value
        #[arg(long)]
        strict: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a starter configuration file (default)
    Init,
    /// Print the configuration file path
    Path,
    /// Load, validate and summarise the configuration
    Validate,
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, ConfigError> {
    match path {
        Some(path) => {
            let mut config = EngineConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => EngineConfig::load(),
    }
}

fn init_tracing(verbose: bool, json: bool, level: &str) {
    let default = if verbose { "debug" } else { level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loaded = load_config(cli.config.as_ref());
    let (level, json) = match &loaded {
        Ok(config) => (config.logging.level.clone(), config.logging.json),
        Err(_) => ("info".to_string(), false),
    };
    init_tracing(cli.verbose, cli.json_logs || json, &level);

    // `config` subcommands must work even when the file does not parse.
    if let Commands::Config { action } = &cli.command {
        return match action.as_ref().unwrap_or(&ConfigAction::Init) {
            ConfigAction::Init => commands::config_cmd::init(),
            ConfigAction::Path => commands::config_cmd::path(cli.config.as_ref()),
            ConfigAction::Validate => commands::config_cmd::validate(loaded),
        };
    }
    let config = loaded.map_err(|e| format!("Failed to load config: {e}"))?;

    match cli.command {
        Commands::Ask {
            message,
            stream,
            max_iterations,
        } => commands::ask::run(&config, message, stream, max_iterations).await?,
        Commands::Orchestrate {
            message,
            stream,
            max_rounds,
        } => commands::orchestrate::run(&config, message, stream, max_rounds).await?,
        Commands::Extract {
            patterns,
            realtime,
            incremental,
            strict,
        } => commands::extract::run(patterns, realtime, incremental, strict).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
