pub mod generate;
pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use delve_core::config::{AppConfig, ModelConfig, RetryConfig};
use delve_core::error::{DelveError, Result};
use delve_core::traits::LlmClient;

pub use generate::{extract_json, parse_structured, Generator};
pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use providers::presets::apply_preset;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Ok(Box::new(AnthropicClient::new())),
        "openai" => Ok(Box::new(OpenAiClient::new())),
        // Any OpenAI-compatible server, as long as we know where it lives
        "custom" | "openai-compatible" if config.base_url.is_some() => {
            Ok(Box::new(OpenAiClient::new()))
        }
        p if providers::presets::get_preset(p).is_some() => Ok(Box::new(OpenAiClient::new())),
        other => Err(DelveError::UnsupportedProvider(other.to_string())),
    }
}

/// Build the shared [`Generator`] for a run: primary model, preset
/// resolution, request retries, per-attempt timeouts and fallback models.
pub fn build_generator(config: &AppConfig) -> Result<Generator> {
    let primary_config = apply_preset(&config.model);
    let primary = create_client(&primary_config)?;

    let mut fallbacks = Vec::with_capacity(config.fallback_models.len());
    for fb in &config.fallback_models {
        let fb_config = apply_preset(fb);
        let client = create_client(&fb_config)?;
        fallbacks.push((fb_config, client));
    }

    // Without a [model.retry] section each model gets exactly one attempt.
    let retry = primary_config.retry.clone().unwrap_or(RetryConfig {
        max_retries: 0,
        ..RetryConfig::default()
    });
    let client: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(primary, fallbacks, retry));

    Ok(Generator::new(client, primary_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_client_known_providers() {
        assert!(create_client(&ModelConfig::new("openai", "gpt-4o-mini")).is_ok());
        assert!(create_client(&ModelConfig::new("anthropic", "claude-sonnet")).is_ok());
        assert!(create_client(&ModelConfig::new("ollama", "llama3.1")).is_ok());
    }

    #[test]
    fn test_custom_provider_needs_base_url() {
        let mut config = ModelConfig::new("custom", "local-model");
        assert!(matches!(
            create_client(&config),
            Err(DelveError::UnsupportedProvider(_))
        ));
        config.base_url = Some("http://127.0.0.1:9000/v1/chat/completions".into());
        assert!(create_client(&config).is_ok());
    }

    #[test]
    fn test_build_generator_resolves_preset() {
        let config = AppConfig::parse(
            r#"
[model]
provider = "ollama"
model_id = "llama3.1"

[[fallback_models]]
provider = "groq"
model_id = "llama-3.1-70b"
api_key = "k"
"#,
        )
        .unwrap();
        let gen = build_generator(&config).unwrap();
        assert_eq!(
            gen.config().base_url.as_deref(),
            Some("http://localhost:11434/v1/chat/completions")
        );
    }
}
