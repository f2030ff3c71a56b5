use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one workflow invocation.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// An inline image attached to a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub media_type: String,
    /// Base64 payload, without a `data:` prefix.
    pub data: String,
}

impl ImageData {
    /// Wrap a base64 payload, reading the media type off its leading bytes.
    /// Unrecognised payloads are assumed to be JPEG.
    pub fn from_base64(data: impl Into<String>) -> Self {
        let data = data.into();
        let media_type = match data.as_bytes() {
            [b'i', b'V', b'B', b'O', b'R', ..] => "image/png",
            [b'R', b'0', b'l', b'G', ..] => "image/gif",
            [b'U', b'k', b'l', b'G', ..] => "image/webp",
            _ => "image/jpeg",
        };
        Self {
            media_type: media_type.to_string(),
            data,
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// A chat message sent to a text-generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Images sent alongside `content`; only user messages carry them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            images: Vec::new(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_image(mut self, image: ImageData) -> Self {
        self.images.push(image);
        self
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// Message ID from the API.
    MessageId(String),
}

/// A JSON schema the backend output must conform to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSchema {
    /// Short identifier, also used as the schema name for providers that need one.
    pub name: String,
    pub schema: serde_json::Value,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Names listed under the schema's `required` array.
    pub fn required_fields(&self) -> Vec<&str> {
        self.schema["required"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

/// One entry of a search engine results page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Result of scraping one URL. A failed page is a value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    #[serde(default)]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub failure: Option<String>,
}

impl ScrapedPage {
    pub fn success(url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extracted_text: Some(text.into()),
            failure: None,
        }
    }

    pub fn failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extracted_text: None,
            failure: Some(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Kind of content a PDF chunk was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Text,
    Table,
    Image,
}

/// Output of the PDF extraction tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdfExtraction {
    pub text_chunks: Vec<String>,
    pub table_chunks: Vec<String>,
    /// Base64-encoded images.
    pub image_chunks: Vec<String>,
}

impl PdfExtraction {
    pub fn is_empty(&self) -> bool {
        self.text_chunks.is_empty() && self.table_chunks.is_empty() && self.image_chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.text_chunks.len() + self.table_chunks.len() + self.image_chunks.len()
    }
}

/// A chunk returned by `retrieve`, ranked by relevance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRef {
    pub doc_id: String,
    pub kind: ChunkKind,
    pub content: String,
    pub score: f32,
}

/// Workflow progress event broadcast to all subscribers.
///
/// Purely observational: nothing in the engine reads these back.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A workflow invocation started.
    RunStarted {
        run_id: RunId,
        question: String,
        pdf_path: Option<String>,
    },
    /// A step is about to execute.
    StepStarted { run_id: RunId, step: String, index: usize },
    /// A step finished and its output was merged into state.
    StepCompleted {
        run_id: RunId,
        step: String,
        index: usize,
        slot: String,
        delta: serde_json::Value,
        elapsed_ms: u64,
    },
    /// A step attempt failed and will be retried.
    StepRetry {
        run_id: RunId,
        step: String,
        attempt: u32,
        error: String,
    },
    /// A step failed for good; the run halts.
    StepFailed { run_id: RunId, step: String, error: String },
    /// The router picked the next step.
    RouteChosen {
        run_id: RunId,
        next_step: String,
        reason: String,
    },
    /// The run reached a terminal outcome.
    RunFinished {
        run_id: RunId,
        outcome: String,
        steps_executed: usize,
    },
}

impl WorkflowEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StepRetry { run_id, .. }
            | Self::StepFailed { run_id, .. }
            | Self::RouteChosen { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_fields() {
        let schema = ResponseSchema::new(
            "route",
            serde_json::json!({
                "type": "object",
                "required": ["next_step", "reason"]
            }),
        );
        assert_eq!(schema.required_fields(), vec!["next_step", "reason"]);
    }

    #[test]
    fn test_scraped_page_markers() {
        let ok = ScrapedPage::success("https://a.example", "text");
        assert!(!ok.is_failed());
        let bad = ScrapedPage::failed("https://b.example", "HTTP 404");
        assert!(bad.is_failed());
        assert!(bad.extracted_text.is_none());
    }

    #[test]
    fn test_image_media_type_sniffing() {
        assert_eq!(ImageData::from_base64("iVBORw0KGgoAAA").media_type, "image/png");
        assert_eq!(ImageData::from_base64("/9j/4AAQSkZJRg").media_type, "image/jpeg");
        assert_eq!(ImageData::from_base64("R0lGODlhAQAB").media_type, "image/gif");
        assert_eq!(ImageData::from_base64("aW1hZ2U=").media_type, "image/jpeg");
        assert_eq!(
            ImageData::from_base64("iVBORw0KGgo").data_url(),
            "data:image/png;base64,iVBORw0KGgo"
        );
    }

    #[test]
    fn test_message_with_image() {
        let msg = ChatMessage::user("describe").with_image(ImageData::from_base64("aW1hZ2U="));
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.images.len(), 1);
        assert!(ChatMessage::system("s").images.is_empty());
    }

    #[test]
    fn test_pdf_extraction_len() {
        let ex = PdfExtraction {
            text_chunks: vec!["a".into(), "b".into()],
            table_chunks: vec!["t".into()],
            image_chunks: vec![],
        };
        assert_eq!(ex.len(), 3);
        assert!(!ex.is_empty());
        assert!(PdfExtraction::default().is_empty());
    }
}
