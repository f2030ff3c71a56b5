use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use delve_core::config::ModelConfig;
use delve_core::error::{DelveError, Result};
use delve_core::traits::LlmClient;
use delve_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: &'static str,
    content: OaiContent,
}

/// Plain text, or a parts array once images are attached.
#[derive(Serialize, Debug, PartialEq)]
#[serde(untagged)]
pub(crate) enum OaiContent {
    Text(String),
    Parts(Vec<OaiPart>),
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum OaiPart {
    Text { text: String },
    ImageUrl { image_url: OaiImageUrl },
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiImageUrl {
    url: String,
}

fn message_content(msg: ChatMessage) -> OaiContent {
    if msg.images.is_empty() {
        return OaiContent::Text(msg.content);
    }
    let mut parts = vec![OaiPart::Text { text: msg.content }];
    parts.extend(msg.images.iter().map(|image| OaiPart::ImageUrl {
        image_url: OaiImageUrl {
            url: image.data_url(),
        },
    }));
    OaiContent::Parts(parts)
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|msg| OaiMessage {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: message_content(msg),
        })
        .collect()
}

/// `response_format` payload for structured output.
pub(crate) fn response_format(schema: &ResponseSchema) -> serde_json::Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": schema.name,
            "schema": schema.schema,
            "strict": false,
        }
    })
}

pub(crate) fn parse_chunk(event: SseEvent, first: &mut bool) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let chunk: StreamChunk = match serde_json::from_str(&event.data) {
        Ok(c) => c,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse OpenAI SSE chunk");
            return vec![];
        }
    };

    let mut deltas = Vec::new();

    if *first {
        *first = false;
        if let Some(id) = chunk.id {
            deltas.push(Ok(StreamDelta::MessageId(id)));
        }
    }

    if let Some(usage) = chunk.usage {
        deltas.push(Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }

    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(text) = choice.delta.and_then(|d| d.content) {
            if !text.is_empty() {
                deltas.push(Ok(StreamDelta::TextDelta(text)));
            }
        }
        if let Some(reason) = choice.finish_reason {
            let stop = match reason.as_str() {
                "length" => StopReason::MaxTokens,
                "stop" => StopReason::EndTurn,
                _ => StopReason::EndTurn,
            };
            deltas.push(Ok(StreamDelta::Stop(stop)));
        }
    }

    deltas
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        schema: Option<&ResponseSchema>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let response_format = schema.map(response_format);

        Box::pin(async move {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: Some(config.temperature),
                stream: true,
                response_format,
            };

            debug!(model = %config.model_id, url = %base_url, "OpenAI-compatible request");

            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            // Apply extra headers from config (set by presets or user)
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| DelveError::llm_transport(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(DelveError::llm_http(status.as_u16(), body));
            }

            let sse_stream = SseStream::new(response.bytes_stream());
            let mut first = true;
            let delta_stream = sse_stream
                .map(move |event| futures::stream::iter(parse_chunk(event, &mut first)))
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_convert_messages_roles() {
        let msgs = convert_messages(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
        ]);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[1].role, "user");
        assert_eq!(msgs[1].content, OaiContent::Text("hi".into()));
    }

    #[test]
    fn test_image_sent_as_image_url_part() {
        let msgs = convert_messages(vec![ChatMessage::user("what is shown?")
            .with_image(ImageData::from_base64("iVBORw0KGgo"))]);
        let json = serde_json::to_value(&msgs[0]).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "what is shown?");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/png;base64,iVBORw0KGgo"
        );
    }

    #[test]
    fn test_response_format_payload() {
        let schema = ResponseSchema::new("route", serde_json::json!({"type": "object"}));
        let fmt = response_format(&schema);
        assert_eq!(fmt["type"], "json_schema");
        assert_eq!(fmt["json_schema"]["name"], "route");
    }

    #[test]
    fn test_parse_text_and_stop() {
        let mut first = true;
        let deltas = parse_chunk(
            event(r#"{"id":"c1","choices":[{"delta":{"content":"Hel"}}]}"#),
            &mut first,
        );
        assert!(matches!(deltas[0], Ok(StreamDelta::MessageId(ref id)) if id == "c1"));
        assert!(matches!(deltas[1], Ok(StreamDelta::TextDelta(ref t)) if t == "Hel"));

        let deltas = parse_chunk(
            event(r#"{"id":"c1","choices":[{"delta":{},"finish_reason":"length"}]}"#),
            &mut first,
        );
        assert_eq!(deltas.len(), 1);
        assert!(matches!(deltas[0], Ok(StreamDelta::Stop(StopReason::MaxTokens))));
    }

    #[test]
    fn test_parse_done_and_garbage() {
        let mut first = false;
        assert!(parse_chunk(event("[DONE]"), &mut first).is_empty());
        assert!(parse_chunk(event("not json"), &mut first).is_empty());
    }
}
