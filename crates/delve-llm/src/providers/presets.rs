use std::collections::HashMap;

use delve_core::config::ModelConfig;

/// A named provider preset for OpenAI-compatible APIs.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    type Headers = &'static [(&'static str, &'static str)];
    let (default_base_url, needs_api_key, extra_headers): (&'static str, bool, Headers) = match provider {
        "ollama" => ("http://localhost:11434/v1/chat/completions", false, &[]),
        "vllm" => ("http://localhost:8000/v1/chat/completions", false, &[]),
        "lmstudio" => ("http://localhost:1234/v1/chat/completions", false, &[]),
        "groq" => ("https://api.groq.com/openai/v1/chat/completions", true, &[]),
        "openrouter" => (
            "https://openrouter.ai/api/v1/chat/completions",
            true,
            &[("X-Title", "Delve")],
        ),
        "together" => ("https://api.together.xyz/v1/chat/completions", true, &[]),
        "mistral" => ("https://api.mistral.ai/v1/chat/completions", true, &[]),
        "deepseek" => ("https://api.deepseek.com/v1/chat/completions", true, &[]),
        _ => return None,
    };
    Some(ProviderPreset {
        default_base_url,
        needs_api_key,
        extra_headers,
    })
}

/// Build extra headers from a preset + user config overrides.
pub fn build_extra_headers(
    preset: &ProviderPreset,
    user_headers: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = preset
        .extra_headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    // User overrides take precedence
    headers.extend(user_headers.iter().map(|(k, v)| (k.clone(), v.clone())));
    headers
}

/// Fill in base URL and headers for preset providers.
/// Explicit values in the config always win.
pub fn apply_preset(config: &ModelConfig) -> ModelConfig {
    let mut resolved = config.clone();
    if let Some(preset) = get_preset(&config.provider) {
        if resolved.base_url.is_none() {
            resolved.base_url = Some(preset.default_base_url.to_string());
        }
        resolved.extra_headers = build_extra_headers(&preset, &config.extra_headers);
        if preset.needs_api_key && resolved.api_key.is_none() {
            tracing::warn!(provider = %config.provider, "Provider expects an API key but none is configured");
        }
    }
    resolved
}

/// List all known preset provider names.
pub fn all_preset_names() -> &'static [&'static str] {
    &[
        "ollama",
        "vllm",
        "lmstudio",
        "groq",
        "openrouter",
        "together",
        "mistral",
        "deepseek",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_preset_resolves() {
        for name in all_preset_names() {
            assert!(get_preset(name).is_some(), "missing preset {name}");
        }
        assert!(get_preset("openai").is_none());
    }

    #[test]
    fn test_apply_preset_fills_base_url() {
        let config = ModelConfig::new("ollama", "llama3.1");
        let resolved = apply_preset(&config);
        assert_eq!(
            resolved.base_url.as_deref(),
            Some("http://localhost:11434/v1/chat/completions")
        );
    }

    #[test]
    fn test_user_header_overrides_preset() {
        let mut config = ModelConfig::new("openrouter", "meta-llama/llama-3-70b");
        config.base_url = Some("http://proxy.local/v1/chat/completions".into());
        config
            .extra_headers
            .insert("X-Title".into(), "My Research".into());
        let resolved = apply_preset(&config);
        assert_eq!(resolved.extra_headers["X-Title"], "My Research");
        assert_eq!(
            resolved.base_url.as_deref(),
            Some("http://proxy.local/v1/chat/completions")
        );
    }
}
