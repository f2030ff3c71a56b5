use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DelveError, Result};

/// Top-level Delve configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub web_search: Option<WebSearchConfig>,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Where a run without an attached document starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMode {
    /// Answer straight from the text-generation backend first.
    #[default]
    Direct,
    /// Go through the planner/search loop first.
    Search,
}

/// Execution engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum number of step executions per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default)]
    pub entry: EntryMode,
    /// Extra attempts per step after a retryable collaborator failure.
    #[serde(default = "default_step_retries")]
    pub step_retries: u32,
    /// Max simultaneous summarization calls while indexing a PDF.
    #[serde(default = "default_summary_concurrency")]
    pub summary_concurrency: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            entry: EntryMode::default(),
            step_retries: default_step_retries(),
            summary_concurrency: default_summary_concurrency(),
        }
    }
}

fn default_max_steps() -> usize { 40 }
fn default_step_retries() -> u32 { 2 }
fn default_summary_concurrency() -> usize { 3 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-call timeout for one generation request.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            extra_headers: HashMap::new(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }
fn default_llm_timeout() -> u64 { 120 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Web search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    pub api_key: String,
    #[serde(default = "default_search_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_search_provider() -> String { "serper".to_string() }
fn default_search_results() -> usize { 10 }
fn default_search_timeout() -> u64 { 30 }

/// Page scraper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_scrape_timeout")]
    pub timeout_secs: u64,
    /// Extracted text is truncated to this many characters.
    #[serde(default = "default_scrape_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_scrape_timeout(),
            max_chars: default_scrape_max_chars(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_scrape_timeout() -> u64 { 30 }
fn default_scrape_max_chars() -> usize { 20_000 }
fn default_user_agent() -> String { "Delve/0.3".to_string() }

/// PDF extraction and retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfConfig {
    /// External text extractor (poppler's `pdftotext`).
    #[serde(default = "default_pdf_command")]
    pub command: String,
    /// Soft upper bound on characters per text chunk.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    /// Chunks smaller than this are merged into their neighbour.
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    /// Number of chunks handed to the PDF answer prompt.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_pdf_timeout")]
    pub timeout_secs: u64,
    /// Image extractor (poppler's `pdfimages`). Images are skipped when unset.
    #[serde(default)]
    pub image_command: Option<String>,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    /// Extracted images smaller than this are icons or rules, not figures.
    #[serde(default = "default_min_image_bytes")]
    pub min_image_bytes: u64,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            command: default_pdf_command(),
            chunk_chars: default_chunk_chars(),
            min_chunk_chars: default_min_chunk_chars(),
            top_k: default_top_k(),
            timeout_secs: default_pdf_timeout(),
            image_command: None,
            max_images: default_max_images(),
            min_image_bytes: default_min_image_bytes(),
        }
    }
}

fn default_pdf_command() -> String { "pdftotext".to_string() }
fn default_chunk_chars() -> usize { 6_000 }
fn default_min_chunk_chars() -> usize { 2_000 }
fn default_top_k() -> usize { 4 }
fn default_pdf_timeout() -> u64 { 120 }
fn default_max_images() -> usize { 16 }
fn default_min_image_bytes() -> u64 { 4096 }

/// Embedding model configuration for PDF chunk retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "openai", "ollama", or any OpenAI-compatible API.
    pub provider: String,
    /// Model name (e.g., "text-embedding-3-small", "nomic-embed-text").
    pub model: String,
    /// Base URL for the embedding API (e.g., "http://localhost:11434/v1").
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key (optional, for cloud providers).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Embedding dimensions (default: 1536).
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
}

fn default_embedding_dims() -> usize { 1536 }

/// JSONL run log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ./delve-logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// 1 = run summary only, 2 = per-step, 3 = per-step with state deltas (default: 2).
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
            level: 2,
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

impl LogConfig {
    pub fn dir(&self) -> PathBuf {
        let dir = self.log_dir.as_deref().unwrap_or("./delve-logs");
        expand_home(dir)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| DelveError::ConfigNotFound(path.display().to_string()))?;
        debug!(path = %path.display(), "Loading config");
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| DelveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workflow.max_steps == 0 {
            return Err(DelveError::Config("workflow.max_steps must be at least 1".into()));
        }
        if self.workflow.summary_concurrency == 0 {
            return Err(DelveError::Config(
                "workflow.summary_concurrency must be at least 1".into(),
            ));
        }
        if self.pdf.top_k == 0 {
            return Err(DelveError::Config("pdf.top_k must be at least 1".into()));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    warn!(var = %var_name, "Config references an unset environment variable");
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
