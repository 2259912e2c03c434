//! LLM Provider implementations for Deskmate.
//!
//! All providers implement the `deskmate_core::Provider` trait. There is one
//! real backend: OpenAI (or any endpoint speaking its API). The factory below
//! picks the base URL from configuration.

pub mod openai;

pub use openai::OpenAiProvider;

use deskmate_config::AppConfig;
use deskmate_core::error::ProviderError;
use deskmate_core::provider::Provider;
use std::sync::Arc;

/// Build the configured LLM provider.
///
/// Fails when no API key is available — the service cannot answer anything
/// without a model, so this is a startup error, not a degraded mode.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no API key set; export OPENAI_API_KEY or set api_key in config.toml".into(),
        )
    })?;

    let provider: Arc<dyn Provider> = match &config.api_url {
        Some(url) => Arc::new(OpenAiProvider::compatible("openai-compatible", url, &api_key)),
        None => Arc::new(OpenAiProvider::openai(&api_key)),
    };

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_fails_without_api_key() {
        let config = AppConfig::default();
        let result = build_from_config(&config);
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn build_succeeds_with_api_key() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn build_uses_custom_base_url() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            api_url: Some("http://localhost:8080/v1".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai-compatible");
    }
}
