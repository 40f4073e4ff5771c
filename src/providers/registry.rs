use std::sync::Arc;
use std::time::Duration;

use crate::config::types::VoxConfig;
use crate::error::{Result, VoxError};
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::openai::OpenAIProvider;
use crate::providers::traits::AIProvider;

/// Build a provider, reading its API key from the environment once.
pub fn create_provider(
    name: &str,
    model: Option<&str>,
    config: &VoxConfig,
) -> Result<Arc<dyn AIProvider>> {
    create_provider_with(name, model, config, |key| std::env::var(key).ok())
}

pub fn create_provider_with<F>(
    name: &str,
    model: Option<&str>,
    config: &VoxConfig,
    lookup: F,
) -> Result<Arc<dyn AIProvider>>
where
    F: Fn(&str) -> Option<String>,
{
    let provider_config =
        config
            .providers
            .get(name)
            .ok_or_else(|| VoxError::ProviderNotFound {
                provider: name.to_string(),
            })?;

    let api_key = lookup(&provider_config.api_key_env)
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| VoxError::ApiKeyMissing {
            provider: name.to_string(),
            env_var: provider_config.api_key_env.clone(),
        })?;

    let model = model
        .map(String::from)
        .unwrap_or_else(|| provider_config.default_model.clone());

    let timeout = Duration::from_millis(config.generator.request_timeout_ms);
    let base_url = provider_config.base_url.clone();
    let provider: Arc<dyn AIProvider> = match name {
        "anthropic" => Arc::new(AnthropicProvider::new(api_key, model, base_url, timeout)?),
        "openai" => Arc::new(OpenAIProvider::new(api_key, model, base_url, timeout)?),
        _ => {
            return Err(VoxError::ProviderNotFound {
                provider: name.to_string(),
            });
        }
    };

    Ok(provider)
}
