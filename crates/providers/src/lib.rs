//! Generation providers for thinkloop.
//!
//! Every provider implements `thinkloop_core::Provider`. The controllers
//! never see which backend answers them.

pub mod openai_compat;

use std::sync::Arc;

use thinkloop_config::EngineConfig;
use thinkloop_core::Provider;
use tracing::{info, warn};

pub use openai_compat::OpenAiCompatProvider;

/// Build the configured provider.
///
/// Returns `None` when no API key is configured or the client cannot be
/// built; callers report that as a configuration error.
pub fn build_from_config(config: &EngineConfig) -> Option<Arc<dyn Provider>> {
    if !config.has_api_key() {
        warn!("No API key configured; set provider.api_key or THINKLOOP_API_KEY");
        return None;
    }
    match OpenAiCompatProvider::from_config(&config.provider) {
        Ok(provider) => {
            info!(
                provider = %config.provider.name,
                base_url = %provider.base_url(),
                model = %config.provider.model,
                "Provider ready"
            );
            Some(Arc::new(provider))
        }
        Err(e) => {
            warn!(error = %e, "Failed to build provider");
            None
        }
    }
}
