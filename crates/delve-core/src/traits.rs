use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Streaming text-generation backend.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    ///
    /// When `schema` is set the provider must constrain its output to it
    /// (natively or by instruction); validation happens in the caller.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        schema: Option<&ResponseSchema>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Web search collaborator.
pub trait SearchTool: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Ordered results, best first.
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<SearchHit>>>;
}

/// Page scraping collaborator.
pub trait ScrapeTool: Send + Sync + 'static {
    /// Never fails: an unreachable page yields a `ScrapedPage` with a failure marker.
    fn scrape<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ScrapedPage>;
}

/// PDF-to-structured-content collaborator.
pub trait PdfExtractor: Send + Sync + 'static {
    fn extract<'a>(&'a self, file_path: &'a str) -> BoxFuture<'a, Result<PdfExtraction>>;
}

/// Embedding collaborator used by the chunk index.
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embed a batch of texts into vectors.
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;
    /// Number of dimensions in the embedding vectors.
    fn dimensions(&self) -> usize;
}
