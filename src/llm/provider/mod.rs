//! LLM Provider implementations and factory

pub mod openrouter;

use std::sync::Arc;

use crate::core::config::{Config, ProviderType};
use crate::core::Result;
use crate::llm::traits::LLMProvider;
use crate::llm::OllamaClient;

use self::openrouter::OpenRouterProvider;

/// Create a new LLM provider based on configuration
pub fn create_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    let provider: Arc<dyn LLMProvider> = match config.provider {
        ProviderType::Ollama => Arc::new(OllamaClient::from_config(config)),
        ProviderType::OpenRouter => Arc::new(OpenRouterProvider::from_config(config)),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_provider() {
        let mut config = Config::default();
        assert_eq!(create_provider(&config).unwrap().name(), "ollama");
        config.provider = ProviderType::OpenRouter;
        assert_eq!(create_provider(&config).unwrap().name(), "openrouter");
    }
}
