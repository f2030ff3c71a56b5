use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use delve_core::config::ModelConfig;
use delve_core::error::{DelveError, Result};
use delve_core::traits::LlmClient;
use delve_core::types::*;

/// One-shot text generation on top of a streaming [`LlmClient`].
///
/// Reading a response is bounded by `ModelConfig::timeout_secs`. Opening
/// one is bounded per attempt by [`crate::RetryingClient`], which
/// [`crate::build_generator`] always puts in front of the backend.
#[derive(Clone)]
pub struct Generator {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl Generator {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Free-form generation: returns the concatenated response text.
    pub async fn generate(&self, system: &str, user: &str) -> Result<String> {
        self.complete(vec![ChatMessage::system(system), ChatMessage::user(user)], None)
            .await
    }

    /// Free-form generation about one image, sent next to `user`.
    pub async fn generate_with_image(
        &self,
        system: &str,
        user: &str,
        image: ImageData,
    ) -> Result<String> {
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(user).with_image(image),
        ];
        self.complete(messages, None).await
    }

    /// Generation constrained to `schema`, parsed into `T`.
    ///
    /// Output that is not JSON, lacks a required field, or does not
    /// deserialize into `T` is a [`DelveError::SchemaViolation`].
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
        schema: &ResponseSchema,
    ) -> Result<T> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let text = self.complete(messages, Some(schema)).await?;
        parse_structured(&text, schema)
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        schema: Option<&ResponseSchema>,
    ) -> Result<String> {
        let stream = self.client.chat_stream(&self.config, messages, schema).await?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(timeout, self.collect(stream)).await {
            Ok(result) => result,
            Err(_) => Err(DelveError::LlmTimeout(self.config.timeout_secs)),
        }
    }

    async fn collect(&self, mut stream: BoxStream<'_, Result<StreamDelta>>) -> Result<String> {
        let mut text = String::new();
        let mut stop = None;
        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(t) => text.push_str(&t),
                StreamDelta::Stop(reason) => stop = Some(reason),
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => debug!(input_tokens, output_tokens, "Token usage"),
                StreamDelta::MessageId(id) => debug!(message_id = %id, "Response started"),
            }
        }

        match stop {
            Some(StopReason::MaxTokens) => {
                warn!(model = %self.config.model_id, "Response truncated at max_tokens")
            }
            None if text.is_empty() => {
                return Err(DelveError::LlmStream("stream ended with no content".into()))
            }
            None => debug!("Stream ended without a stop marker"),
            Some(_) => {}
        }

        if text.trim().is_empty() {
            return Err(DelveError::LlmStream("empty response".into()));
        }
        Ok(text)
    }
}

/// Pull the JSON payload out of a model response that may wrap it in
/// prose or a fenced code block.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                return after[..end].trim();
            }
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

/// Validate a raw response against `schema` and deserialize it.
pub fn parse_structured<T: DeserializeOwned>(text: &str, schema: &ResponseSchema) -> Result<T> {
    let violation = |message: String| DelveError::SchemaViolation {
        schema: schema.name.clone(),
        message,
    };

    let value: serde_json::Value = serde_json::from_str(extract_json(text))
        .map_err(|e| violation(format!("not valid JSON: {e}")))?;

    let obj = value
        .as_object()
        .ok_or_else(|| violation("expected a JSON object".into()))?;
    let missing: Vec<&str> = schema
        .required_fields()
        .into_iter()
        .filter(|f| obj.get(*f).map_or(true, |v| v.is_null()))
        .collect();
    if !missing.is_empty() {
        return Err(violation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )));
    }

    serde_json::from_value(value).map_err(|e| violation(e.to_string()))
}
