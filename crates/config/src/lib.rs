//! Configuration loading, validation, and management for thinkloop.
//!
//! Loads configuration from `~/.thinkloop/config.toml` with environment
//! variable overrides. Iteration and round limits that are not positive are
//! corrected to their defaults instead of failing startup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default reasoning iterations per reasoning loop invocation.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default orchestration rounds per orchestrator invocation.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// The root configuration structure.
///
/// Maps directly to `~/.thinkloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Generation backend
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Reasoning loop limits and tool behaviour
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Orchestrator limits and specialists
    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name, used in logs
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used by the host and by specialists without an override
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Reasoning iterations before the loop forces a final answer
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Tools whose result ends the loop immediately
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub return_direct: Vec<String>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            return_direct: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Rounds before the orchestrator forces a final answer
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Specialist that receives steps assigned to an unknown name.
    /// When unset the host handles them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_specialist: Option<String>,

    /// Surface plan step fields while the plan is still being generated
    #[serde(default = "default_true")]
    pub progressive_plan: bool,

    /// Re-prompts allowed when plan, feedback or update JSON is malformed
    #[serde(default)]
    pub json_retries: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specialists: Vec<SpecialistConfig>,
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}
fn default_true() -> bool {
    true
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            fallback_specialist: None,
            progressive_plan: true,
            json_retries: 0,
            specialists: Vec::new(),
        }
    }
}

/// A specialist backed by its own reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistConfig {
    pub name: String,

    /// What the specialist is for; shown to the planner
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    /// Names of the registry tools bound to this specialist
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.thinkloop/config.toml).
    ///
    /// Environment variables override the file:
    /// - `THINKLOOP_API_KEY`, then `OPENAI_API_KEY`
    /// - `THINKLOOP_BASE_URL`
    /// - `THINKLOOP_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse, validate and normalise a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        config.normalize();
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.provider.api_key.is_none() {
            self.provider.api_key =
                lookup("THINKLOOP_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(url) = lookup("THINKLOOP_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = lookup("THINKLOOP_MODEL") {
            self.provider.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".thinkloop")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for specialist in &self.orchestration.specialists {
            if specialist.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "specialist name must not be empty".into(),
                ));
            }
            if !seen.insert(specialist.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate specialist '{}'",
                    specialist.name
                )));
            }
        }

        if let Some(fallback) = &self.orchestration.fallback_specialist
            && !seen.contains(fallback.as_str())
        {
            return Err(ConfigError::ValidationError(format!(
                "fallback_specialist '{fallback}' is not a configured specialist"
            )));
        }

        Ok(())
    }

    /// Replace non-positive limits with defaults.
    pub fn normalize(&mut self) {
        self.reasoning.max_iterations =
            positive_or_default("reasoning.max_iterations", self.reasoning.max_iterations, DEFAULT_MAX_ITERATIONS);
        self.orchestration.max_rounds =
            positive_or_default("orchestration.max_rounds", self.orchestration.max_rounds, DEFAULT_MAX_ROUNDS);
        for specialist in &mut self.orchestration.specialists {
            if let Some(max) = specialist.max_iterations {
                specialist.max_iterations =
                    Some(positive_or_default("specialist.max_iterations", max, DEFAULT_MAX_ITERATIONS));
            }
        }
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.orchestration.specialists = vec![
            SpecialistConfig {
                name: "researcher".into(),
                description: "Gathers facts and background information".into(),
                system_prompt: None,
                model: None,
                max_iterations: None,
                tools: Vec::new(),
            },
            SpecialistConfig {
                name: "writer".into(),
                description: "Turns findings into clear prose".into(),
                system_prompt: None,
                model: None,
                max_iterations: Some(4),
                tools: Vec::new(),
            },
        ];
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Log and correct a limit of zero.
pub fn positive_or_default(field: &str, value: u32, default: u32) -> u32 {
    if value == 0 {
        tracing::warn!(field, default, "Non-positive limit corrected to default");
        default
    } else {
        value
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
