//! `thinkloop config`: configuration management commands.

use std::path::PathBuf;

use thinkloop_config::{ConfigError, EngineConfig};

pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", EngineConfig::default_toml());
    Ok(())
}

pub fn path(explicit: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path(explicit).display());
    Ok(())
}

pub fn validate(loaded: Result<EngineConfig, ConfigError>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Provider:     {} ({})", config.provider.name, config.provider.base_url);
    println!("   Model:        {}", config.provider.model);
    println!("   Iterations:   {}", config.reasoning.max_iterations);
    println!("   Rounds:       {}", config.orchestration.max_rounds);
    println!(
        "   Specialists:  {}",
        config
            .orchestration
            .specialists
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

fn config_path(explicit: Option<&PathBuf>) -> PathBuf {
    explicit
        .cloned()
        .unwrap_or_else(|| EngineConfig::config_dir().join("config.toml"))
}

/// Settings that load fine but will not work as intended.
fn warnings(config: &EngineConfig) -> Vec<String> {
    let mut out = Vec::new();
    if !config.has_api_key() {
        out.push("No API key set (provider.api_key, THINKLOOP_API_KEY or OPENAI_API_KEY)".to_string());
    }
    if config.orchestration.specialists.is_empty() {
        out.push("No specialists configured; the host will run every plan step itself".to_string());
    }
    if !config.reasoning.return_direct.is_empty() {
        out.push(format!(
            "reasoning.return_direct names tools ({}) the CLI does not register",
            config.reasoning.return_direct.join(", ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_defaults_to_home() {
        let path = config_path(None);
        assert!(path.ends_with(".thinkloop/config.toml"));

        let explicit = PathBuf::from("/tmp/custom.toml");
        assert_eq!(config_path(Some(&explicit)), explicit);
    }

    #[test]
    fn default_config_warns_about_missing_key() {
        let warnings = warnings(&EngineConfig::default());
        assert!(warnings.iter().any(|w| w.contains("API key")));
        assert!(warnings.iter().any(|w| w.contains("No specialists")));
    }

    #[test]
    fn starter_file_has_specialists() {
        let config = EngineConfig::from_toml_str(&EngineConfig::default_toml()).unwrap();
        assert!(warnings(&config).iter().all(|w| !w.contains("No specialists")));
    }
}
