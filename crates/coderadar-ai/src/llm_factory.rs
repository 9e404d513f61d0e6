use crate::llm_provider::{LLMProvider, ProviderSettings};
use anyhow::{anyhow, bail, Result};
use coderadar_core::config_manager::LLMConfig;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 2;

/// Builds the provider named by `llm.provider` from the compiled-in set.
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    pub fn create_from_config(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        if !config.enabled {
            bail!("LLM is not enabled in configuration");
        }

        match config.provider.to_ascii_lowercase().as_str() {
            #[cfg(feature = "anthropic")]
            "anthropic" => {
                use crate::anthropic_provider::{AnthropicProvider, DEFAULT_BASE_URL, DEFAULT_MODEL};
                let settings = settings_for(
                    config,
                    config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                    DEFAULT_BASE_URL,
                    "ANTHROPIC_API_KEY",
                );
                Ok(Arc::new(AnthropicProvider::new(settings)?))
            }
            #[cfg(feature = "openai-compatible")]
            "openai-compatible" => {
                use crate::openai_compatible_provider::{OpenAICompatibleProvider, DEFAULT_BASE_URL};
                // Local servers host arbitrary models, so there is no sensible default.
                let model = config
                    .model
                    .clone()
                    .ok_or_else(|| anyhow!("llm.model is required for the openai-compatible provider"))?;
                let settings = settings_for(config, model, DEFAULT_BASE_URL, "OPENAI_API_KEY");
                Ok(Arc::new(OpenAICompatibleProvider::new(settings)?))
            }
            other => Err(anyhow!(
                "LLM provider '{}' is not available in this build (compiled in: {})",
                other,
                Self::supported_providers().join(", ")
            )),
        }
    }

    #[allow(unused_mut)]
    pub fn supported_providers() -> Vec<&'static str> {
        let mut providers = Vec::new();
        #[cfg(feature = "anthropic")]
        providers.push("anthropic");
        #[cfg(feature = "openai-compatible")]
        providers.push("openai-compatible");
        providers
    }
}

#[allow(dead_code)]
fn settings_for(
    config: &LLMConfig,
    model: String,
    default_base_url: &str,
    key_env: &str,
) -> ProviderSettings {
    ProviderSettings {
        model,
        base_url: config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url.to_string()),
        api_key: config
            .api_key
            .clone()
            .or_else(|| std::env::var(key_env).ok()),
        timeout: Duration::from_secs(config.timeout_secs),
        max_retries: DEFAULT_MAX_RETRIES,
    }
}
