//! LLM provider implementations for Hearthclaw.
//!
//! The engine talks to providers only through the
//! [`hearthclaw_core::Provider`] trait; this crate supplies the
//! OpenAI-compatible implementation and a small factory that builds one
//! from configuration.

mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use hearthclaw_config::AppConfig;
use hearthclaw_core::error::ProviderError;
use hearthclaw_core::provider::Provider;
use std::sync::Arc;

/// Build the configured default provider.
///
/// Any provider section with an `api_url` is treated as an
/// OpenAI-compatible endpoint; the bare provider name "ollama" gets the
/// usual local default URL.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = config.default_provider.as_str();
    let section = config.providers.get(name);

    let api_key = config
        .provider_api_key(name)
        .map(String::from)
        .unwrap_or_default();

    let provider = match (name, section.and_then(|s| s.api_url.as_deref())) {
        (_, Some(url)) => OpenAiCompatProvider::new(name, url, api_key)?,
        ("ollama", None) => OpenAiCompatProvider::ollama(None)?,
        ("openai", None) => {
            if api_key.is_empty() {
                return Err(ProviderError::NotConfigured(
                    "no API key configured for provider 'openai'".into(),
                ));
            }
            OpenAiCompatProvider::openai(api_key)?
        }
        (other, None) => {
            return Err(ProviderError::NotConfigured(format!(
                "provider '{other}' has no api_url configured"
            )));
        }
    };

    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_builds_without_key() {
        let config =
            AppConfig::from_toml_str("default_provider = \"ollama\"\n").unwrap();
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn custom_endpoint_builds_from_api_url() {
        let config = AppConfig::from_toml_str(
            "default_provider = \"vllm\"\n[providers.vllm]\napi_url = \"http://gpu-box:8000/v1\"\n",
        )
        .unwrap();
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "vllm");
    }

    #[test]
    fn openai_without_key_is_rejected() {
        let config = AppConfig::from_toml_str("").unwrap();
        let err = build_provider(&config).map(|_| ()).unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
