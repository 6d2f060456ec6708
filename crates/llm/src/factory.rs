//! Generation provider factory.
//!
//! Resolves a provider name from configuration into a ready client.

use crate::client::LlmClient;
use crate::providers::{OllamaClient, OpenAiCompatibleClient};
use crate::types::ProviderType;
use std::sync::Arc;
use std::time::Duration;

/// Settings needed to build any client.
#[derive(Debug, Clone)]
pub struct ClientSettings<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub endpoint: Option<&'a str>,
    pub api_key: Option<&'a str>,
    pub timeout: Duration,
}

/// Create a generation client based on the provider name.
///
/// # Errors
/// Returns error if the provider is unknown or a hosted provider has no
/// API key.
pub fn create_client(settings: &ClientSettings<'_>) -> Result<Arc<dyn LlmClient>, String> {
    let provider = ProviderType::parse(settings.provider)
        .ok_or_else(|| format!("Unknown provider: {}", settings.provider))?;
    let endpoint = settings.endpoint.unwrap_or(provider.default_endpoint());

    match provider {
        ProviderType::Ollama => {
            let client = OllamaClient::with_base_url(endpoint)
                .with_model(settings.model)
                .with_timeout(settings.timeout);
            Ok(Arc::new(client))
        }
        ProviderType::OpenAi | ProviderType::Groq => {
            let api_key = settings
                .api_key
                .filter(|k| !k.is_empty())
                .ok_or_else(|| format!("{} provider requires API key", provider.display_name()))?;
            let client =
                OpenAiCompatibleClient::new(provider.as_str(), endpoint, api_key, settings.model)
                    .with_timeout(settings.timeout);
            Ok(Arc::new(client))
        }
    }
}
