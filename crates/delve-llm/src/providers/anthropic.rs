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

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Serialize, Debug)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiBlock>),
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Serialize, Debug)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

/// Images go first, as Anthropic recommends for vision prompts.
fn message_content(msg: ChatMessage) -> ApiContent {
    if msg.images.is_empty() {
        return ApiContent::Text(msg.content);
    }
    let mut blocks: Vec<ApiBlock> = msg
        .images
        .into_iter()
        .map(|image| ApiBlock::Image {
            source: ImageSource {
                kind: "base64",
                media_type: image.media_type,
                data: image.data,
            },
        })
        .collect();
    blocks.push(ApiBlock::Text { text: msg.content });
    ApiContent::Blocks(blocks)
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum SseData {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageInfo },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: DeltaInfo },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaInfo,
        #[serde(default)]
        usage: Option<UsageInfo>,
    },
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageInfo {
    id: String,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum DeltaInfo {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// Anthropic has no native response-format switch, so the schema
/// is appended to the system prompt as an instruction.
fn schema_instruction(schema: &ResponseSchema) -> String {
    format!(
        "Respond with a single JSON object and nothing else. \
         It must conform to this JSON Schema (name: {}):\n{}",
        schema.name,
        serde_json::to_string_pretty(&schema.schema).unwrap_or_default()
    )
}

fn convert_messages(
    messages: Vec<ChatMessage>,
    schema: Option<&ResponseSchema>,
) -> (Option<String>, Vec<ApiMessage>) {
    let mut system_parts = Vec::new();
    let mut api_msgs = Vec::new();

    for msg in messages {
        match msg.role.clone() {
            Role::System => system_parts.push(msg.content),
            Role::User => api_msgs.push(ApiMessage {
                role: "user",
                content: message_content(msg),
            }),
            Role::Assistant => api_msgs.push(ApiMessage {
                role: "assistant",
                content: message_content(msg),
            }),
        }
    }

    if let Some(schema) = schema {
        system_parts.push(schema_instruction(schema));
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, api_msgs)
}

fn parse_sse_to_delta(event: SseEvent) -> Option<Result<StreamDelta>> {
    let data: SseData = match serde_json::from_str(&event.data) {
        Ok(d) => d,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE data");
            return None;
        }
    };

    match data {
        SseData::MessageStart { message } => Some(Ok(StreamDelta::MessageId(message.id))),
        SseData::ContentBlockDelta { delta } => match delta {
            DeltaInfo::TextDelta { text } => Some(Ok(StreamDelta::TextDelta(text))),
            DeltaInfo::Other => None,
        },
        SseData::MessageDelta { delta, usage } => {
            if let Some(usage) = usage {
                debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Token usage"
                );
            }
            let stop = match delta.stop_reason.as_deref() {
                Some("end_turn") => StopReason::EndTurn,
                Some("max_tokens") => StopReason::MaxTokens,
                Some("stop_sequence") => StopReason::StopSequence,
                _ => return None,
            };
            Some(Ok(StreamDelta::Stop(stop)))
        }
        SseData::Error { error } => Some(Err(DelveError::LlmStream(error.message))),
        SseData::Other => None,
    }
}

impl LlmClient for AnthropicClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        schema: Option<&ResponseSchema>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let (system, api_messages) = convert_messages(messages, schema);

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| DelveError::Config("Anthropic API key not set".into()))?;

            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                messages: api_messages,
                system,
                stream: true,
            };

            let mut req = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json");
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .json(&body)
                .send()
                .await
                .map_err(|e| DelveError::llm_transport(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(DelveError::llm_http(status.as_u16(), body));
            }

            let sse_stream = SseStream::new(response.bytes_stream());
            let delta_stream =
                sse_stream.filter_map(|event| async move { parse_sse_to_delta(event) });

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
    fn test_system_messages_merged_with_schema() {
        let schema = ResponseSchema::new(
            "plan",
            serde_json::json!({"type": "object", "required": ["search_term"]}),
        );
        let (system, msgs) = convert_messages(
            vec![ChatMessage::system("You plan."), ChatMessage::user("q")],
            Some(&schema),
        );
        let system = system.unwrap();
        assert!(system.starts_with("You plan."));
        assert!(system.contains("search_term"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "user");
    }

    #[test]
    fn test_image_sent_as_base64_block() {
        let (_, msgs) = convert_messages(
            vec![ChatMessage::user("what is shown?")
                .with_image(ImageData::from_base64("/9j/4AAQ"))],
            None,
        );
        let json = serde_json::to_value(&msgs[0]).unwrap();
        assert_eq!(json["content"][0]["type"], "image");
        assert_eq!(json["content"][0]["source"]["type"], "base64");
        assert_eq!(json["content"][0]["source"]["media_type"], "image/jpeg");
        assert_eq!(json["content"][0]["source"]["data"], "/9j/4AAQ");
        assert_eq!(json["content"][1]["type"], "text");
        assert_eq!(json["content"][1]["text"], "what is shown?");
    }

    #[test]
    fn test_plain_message_stays_a_string() {
        let (_, msgs) = convert_messages(vec![ChatMessage::user("q")], None);
        let json = serde_json::to_value(&msgs[0]).unwrap();
        assert_eq!(json["content"], "q");
    }

    #[test]
    fn test_no_system_without_schema() {
        let (system, _) = convert_messages(vec![ChatMessage::user("q")], None);
        assert!(system.is_none());
    }

    #[test]
    fn test_parse_text_delta() {
        let d = parse_sse_to_delta(event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        ));
        assert!(matches!(d, Some(Ok(StreamDelta::TextDelta(ref t))) if t == "hi"));
    }

    #[test]
    fn test_parse_stop_and_ping() {
        let d = parse_sse_to_delta(event(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
        ));
        assert!(matches!(d, Some(Ok(StreamDelta::Stop(StopReason::EndTurn)))));
        assert!(parse_sse_to_delta(event(r#"{"type":"ping"}"#)).is_none());
    }

    #[test]
    fn test_parse_error_event() {
        let d = parse_sse_to_delta(event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        assert!(matches!(d, Some(Err(DelveError::LlmStream(_)))));
    }
}
