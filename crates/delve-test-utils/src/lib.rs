//! Scripted text-generation backend and mock collaborators for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};

use delve_core::config::ModelConfig;
use delve_core::error::{DelveError, Result};
use delve_core::traits::{LlmClient, PdfExtractor, ScrapeTool, SearchTool};
use delve_core::types::*;

/// One request seen by [`ScriptedLlm`].
#[derive(Debug, Clone)]
pub struct LlmCall {
    pub system: String,
    pub user: String,
    /// Name of the requested response schema, if any.
    pub schema: Option<String>,
    /// Base64 payloads of attached images.
    pub images: Vec<String>,
}

impl LlmCall {
    pub fn system_starts_with(&self, prefix: &str) -> bool {
        self.system.starts_with(prefix)
    }
}

type Responder = Box<dyn Fn(&LlmCall) -> Result<String> + Send + Sync>;

/// Backend whose replies come from a closure over the request.
///
/// Every call is recorded; the reply is streamed as one text delta
/// followed by a stop marker. With a delay, calls overlap in time and
/// the highest number of simultaneous calls is tracked.
pub struct ScriptedLlm {
    responder: Responder,
    calls: Mutex<Vec<LlmCall>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&LlmCall) -> String + Send + Sync + 'static,
    {
        Self::fallible(move |call| Ok(respond(call)))
    }

    /// Like [`ScriptedLlm::new`], but the closure may fail the call.
    pub fn fallible<F>(respond: F) -> Self
    where
        F: Fn(&LlmCall) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(respond),
            calls: Mutex::new(Vec::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Hold every reply for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Most calls that were ever waiting on a reply at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<LlmCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose system prompt starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.system_starts_with(prefix))
            .count()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        schema: Option<&ResponseSchema>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let text_of = |role: Role| {
            messages
                .iter()
                .filter(|m| m.role == role)
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };
        let call = LlmCall {
            system: text_of(Role::System),
            user: text_of(Role::User),
            schema: schema.map(|s| s.name.clone()),
            images: messages
                .iter()
                .flat_map(|m| m.images.iter().map(|i| i.data.clone()))
                .collect(),
        };
        let reply = (self.responder)(&call);
        self.calls.lock().unwrap().push(call);

        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            reply.map(|text| {
                let deltas = vec![
                    Ok(StreamDelta::TextDelta(text)),
                    Ok(StreamDelta::Stop(StopReason::EndTurn)),
                ];
                Box::pin(stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>
            })
        })
    }
}

/// Search tool returning the same hits for every query.
pub struct MockSearch {
    hits: Vec<SearchHit>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl SearchTool for MockSearch {
    fn name(&self) -> &str {
        "mock_search"
    }

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
        self.queries.lock().unwrap().push(query.to_string());
        let hits = self.hits.clone();
        Box::pin(async move { Ok(hits) })
    }
}

/// A search hit with a generated snippet.
pub fn hit(url: &str, title: &str) -> SearchHit {
    SearchHit {
        url: url.to_string(),
        title: title.to_string(),
        snippet: format!("Snippet for {}", title),
    }
}

/// Scraper that reads every page except the ones marked as failing.
#[derive(Default)]
pub struct MockScraper {
    failing: HashSet<String>,
    scraped: Mutex<Vec<String>>,
}

impl MockScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            scraped: Mutex::new(Vec::new()),
        }
    }

    pub fn scraped(&self) -> Vec<String> {
        self.scraped.lock().unwrap().clone()
    }
}

impl ScrapeTool for MockScraper {
    fn scrape<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ScrapedPage> {
        self.scraped.lock().unwrap().push(url.to_string());
        let page = if self.failing.contains(url) {
            ScrapedPage::failed(url, "HTTP 404 Not Found")
        } else {
            ScrapedPage::success(url, format!("Full article text from {}", url))
        };
        Box::pin(async move { page })
    }
}

/// PDF extractor returning fixed chunks for any path.
pub struct MockPdf {
    extraction: PdfExtraction,
}

impl MockPdf {
    pub fn new(text_chunks: &[&str], table_chunks: &[&str]) -> Self {
        let owned = |chunks: &[&str]| chunks.iter().map(|c| c.to_string()).collect();
        Self {
            extraction: PdfExtraction {
                text_chunks: owned(text_chunks),
                table_chunks: owned(table_chunks),
                image_chunks: Vec::new(),
            },
        }
    }

    pub fn with_images(mut self, images: &[&str]) -> Self {
        self.extraction.image_chunks = images.iter().map(|c| c.to_string()).collect();
        self
    }
}

impl PdfExtractor for MockPdf {
    fn extract<'a>(&'a self, file_path: &'a str) -> BoxFuture<'a, Result<PdfExtraction>> {
        Box::pin(async move {
            if file_path.ends_with(".missing") {
                return Err(DelveError::PdfExtraction {
                    path: file_path.to_string(),
                    message: "no such file".into(),
                });
            }
            Ok(self.extraction.clone())
        })
    }
}

/// Model config for a scripted backend.
pub fn scripted_model() -> ModelConfig {
    ModelConfig::new("scripted", "scripted-model")
}

/// JSON reply text for a structured call.
pub fn json_reply(value: serde_json::Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripted_llm_records_and_streams() {
        let llm = ScriptedLlm::new(|call| format!("echo: {}", call.user));
        let mut stream = llm
            .chat_stream(
                &scripted_model(),
                vec![ChatMessage::system("role line"), ChatMessage::user("hi")],
                None,
            )
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            if let StreamDelta::TextDelta(t) = delta.unwrap() {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "echo: hi");
        assert_eq!(llm.count("role"), 1);
        assert!(llm.calls()[0].schema.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_calls_track_peak() {
        let llm = ScriptedLlm::new(|_| "ok".into()).with_delay(Duration::from_millis(10));
        let model = scripted_model();
        let (a, b) = futures::join!(
            llm.chat_stream(&model, vec![ChatMessage::user("a")], None),
            llm.chat_stream(&model, vec![ChatMessage::user("b")], None)
        );
        assert!(a.is_ok() && b.is_ok());
        let c = llm
            .chat_stream(&model, vec![ChatMessage::user("c")], None)
            .await;
        assert!(c.is_ok());
        assert_eq!(llm.peak_in_flight(), 2);
        assert_eq!(llm.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_scraper_marks_failures() {
        let scraper = MockScraper::failing(&["https://bad.example"]);
        assert!(scraper.scrape("https://bad.example").await.is_failed());
        assert!(!scraper.scrape("https://good.example").await.is_failed());
        assert_eq!(scraper.scraped().len(), 2);
    }
}
