use thiserror::Error;

#[derive(Debug, Error)]
pub enum DelveError {
    // LLM errors
    /// `status` is the HTTP status when the backend answered at all.
    #[error("LLM request failed: {message}")]
    LlmRequest { status: Option<u16>, message: String },

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM request timed out after {0}s")]
    LlmTimeout(u64),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("Response does not match schema '{schema}': {message}")]
    SchemaViolation { schema: String, message: String },

    // Tool errors
    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("PDF extraction failed for {path}: {message}")]
    PdfExtraction { path: String, message: String },

    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Chunk index error: {0}")]
    Index(String),

    // Workflow errors
    #[error("Step '{step}' may not write slot '{slot}'")]
    SlotOwnership { step: String, slot: String },

    #[error("Graph error: {0}")]
    Graph(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DelveError {
    /// A request that never got an HTTP response (connect, DNS, TLS, reset).
    pub fn llm_transport(message: impl Into<String>) -> Self {
        DelveError::LlmRequest {
            status: None,
            message: message.into(),
        }
    }

    /// A non-success HTTP response from a backend.
    pub fn llm_http(status: u16, body: impl std::fmt::Display) -> Self {
        DelveError::LlmRequest {
            status: Some(status),
            message: format!("HTTP {}: {}", status, body),
        }
    }

    /// Whether re-issuing the same collaborator call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DelveError::LlmRequest { status: None, .. } => true,
            DelveError::LlmRequest {
                status: Some(code),
                ..
            } => matches!(code, 408 | 429 | 500 | 502 | 503 | 504 | 529),
            DelveError::LlmStream(_)
            | DelveError::LlmTimeout(_)
            | DelveError::SchemaViolation { .. }
            | DelveError::ToolExecution { .. }
            | DelveError::ToolTimeout { .. }
            | DelveError::Embedding(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DelveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DelveError::llm_http(429, "Too Many Requests").is_retryable());
        assert!(DelveError::llm_http(529, "overloaded").is_retryable());
        assert!(!DelveError::llm_http(401, "bad key").is_retryable());
        assert!(DelveError::llm_transport("connection reset by peer").is_retryable());
        assert!(DelveError::SchemaViolation {
            schema: "review_verdict".into(),
            message: "missing field".into(),
        }
        .is_retryable());
        assert!(DelveError::LlmTimeout(30).is_retryable());
        assert!(!DelveError::Config("bad".into()).is_retryable());
        assert!(!DelveError::SlotOwnership {
            step: "planner".into(),
            slot: "final_answer".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_status_decides_not_message_text() {
        let err = DelveError::llm_http(
            400,
            "max_tokens: 5000 > 4096, the maximum allowed (retry after 500 ms will not help)",
        );
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "LLM request failed: HTTP 400: max_tokens: 5000 > 4096, the maximum allowed (retry after 500 ms will not help)"
        );
    }
}
