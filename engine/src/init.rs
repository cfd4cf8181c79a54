//! Building a session and gateway configuration from the config file.

use colloquy_config::ColloquyConfig;
use colloquy_context::ModelRegistry;
use colloquy_providers::GatewayConfig;
use colloquy_types::{Provider, SettingsError};

use crate::session::ConversationSession;

impl ConversationSession {
    /// A fresh session from `[app]` settings and `[models.context_windows]` overrides.
    ///
    /// With no config file, every setting takes its default.
    pub fn from_config(config: Option<&ColloquyConfig>) -> Result<Self, SettingsError> {
        let Some(config) = config else {
            return Ok(Self::default());
        };

        let settings = config.chat_settings()?;
        let overrides = config.context_window_overrides();
        if !overrides.is_empty() {
            tracing::debug!(count = overrides.len(), "Applying context window overrides");
        }
        Ok(Self::new(settings, ModelRegistry::with_overrides(overrides)))
    }
}

/// Keys, endpoints and sampling limits for the HTTP gateway.
///
/// Providers without a key are left unconfigured; asking one of their models
/// fails with `GatewayError::MissingApiKey`.
#[must_use]
pub fn gateway_config(config: Option<&ColloquyConfig>) -> GatewayConfig {
    let mut gateway = GatewayConfig::new();
    let fallback = ColloquyConfig::default();
    let config = config.unwrap_or(&fallback);

    for provider in [Provider::Claude, Provider::OpenAI] {
        match config.api_key(provider) {
            Some(key) => gateway = gateway.with_api_key(key),
            None => tracing::debug!(provider = provider.as_str(), "No API key configured"),
        }
    }
    if let Some(base) = config.openai_api_base() {
        gateway = gateway.with_openai_base(base);
    }
    if let Some(base) = config.anthropic_api_base() {
        gateway = gateway.with_anthropic_base(base);
    }
    if let Some(max_tokens) = config.max_tokens_to_sample() {
        gateway = gateway.with_max_tokens_to_sample(max_tokens);
    }
    gateway
}
