//! Provider selection: builds the configured backend.

use std::sync::Arc;

use ironloop_config::AppConfig;
use ironloop_core::error::{Error, Result};
use ironloop_core::provider::Provider;
use tracing::info;

use crate::openai_compat::OpenAiCompatProvider;

/// Build the chat/embedding backend described by `[llm]`.
///
/// Remote endpoints need an API key; local ones (localhost) do not.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>> {
    let base_url = config.llm.base_url.as_str();
    let name = provider_name(base_url);

    let api_key = match (&config.api_key, is_local(base_url)) {
        (Some(key), _) => key.clone(),
        (None, true) => name.to_string(),
        (None, false) => {
            return Err(Error::Config {
                message: format!(
                    "no API key configured for {base_url}; set IRONLOOP_API_KEY or api_key in config.toml"
                ),
            });
        }
    };

    info!(provider = %name, base_url = %base_url, "Using model provider");
    Ok(Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)))
}

fn is_local(base_url: &str) -> bool {
    base_url.contains("://localhost") || base_url.contains("://127.0.0.1")
}

/// A short name for well-known endpoints.
fn provider_name(base_url: &str) -> &'static str {
    if base_url.contains("api.openai.com") {
        "openai"
    } else if base_url.contains("openrouter.ai") {
        "openrouter"
    } else if base_url.contains(":11434") {
        "ollama"
    } else if base_url.contains(":8000") {
        "vllm"
    } else if base_url.contains(":8080") {
        "llamacpp"
    } else {
        "custom"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_names() {
        assert_eq!(provider_name("https://api.openai.com/v1"), "openai");
        assert_eq!(provider_name("http://localhost:11434/v1"), "ollama");
        assert_eq!(provider_name("https://example.org/v1"), "custom");
    }

    #[test]
    fn remote_without_key_is_rejected() {
        let config = AppConfig::default();
        let err = build_from_config(&config).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn local_endpoint_needs_no_key() {
        let mut config = AppConfig::default();
        config.llm.base_url = "http://localhost:11434/v1".into();
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn configured_key_builds_openai() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-test".into());
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }
}
