use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use delve_core::config::WebSearchConfig;
use delve_core::error::{DelveError, Result};
use delve_core::traits::SearchTool;
use delve_core::types::SearchHit;

const SERPER_URL: &str = "https://google.serper.dev/search";
const TAVILY_URL: &str = "https://api.tavily.com/search";

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DelveError::ToolExecution {
            tool: "web_search".into(),
            message: format!("Failed to create HTTP client: {}", e),
        })
}

fn request_error(tool: &str, timeout_secs: u64, e: reqwest::Error) -> DelveError {
    if e.is_timeout() {
        DelveError::ToolTimeout {
            tool: tool.to_string(),
            timeout_secs,
        }
    } else {
        DelveError::ToolExecution {
            tool: tool.to_string(),
            message: e.to_string(),
        }
    }
}

/// Build the configured search provider.
pub fn create_search_tool(config: &WebSearchConfig) -> Result<Box<dyn SearchTool>> {
    match config.provider.as_str() {
        "serper" => Ok(Box::new(SerperSearch::new(config)?)),
        "tavily" => Ok(Box::new(TavilySearch::new(config)?)),
        other => Err(DelveError::Config(format!(
            "unknown web_search.provider '{}' (expected serper or tavily)",
            other
        ))),
    }
}

/// Google results through serper.dev.
pub struct SerperSearch {
    api_key: String,
    max_results: usize,
    timeout_secs: u64,
    http: reqwest::Client,
}

impl SerperSearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        Ok(Self {
            api_key: config.api_key.clone(),
            max_results: config.max_results,
            timeout_secs: config.timeout_secs,
            http: http_client(config.timeout_secs)?,
        })
    }
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

fn parse_serper(body: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let resp: SerperResponse =
        serde_json::from_str(body).map_err(|e| DelveError::ToolExecution {
            tool: "serper".into(),
            message: format!("unexpected response: {}", e),
        })?;
    Ok(resp
        .organic
        .into_iter()
        .take(limit)
        .map(|r| SearchHit {
            url: r.link,
            title: r.title,
            snippet: r.snippet,
        })
        .collect())
}

impl SearchTool for SerperSearch {
    fn name(&self) -> &str {
        "serper"
    }

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
        Box::pin(async move {
            debug!(query, "Serper search");
            let resp = self
                .http
                .post(SERPER_URL)
                .header("X-API-KEY", &self.api_key)
                .json(&json!({ "q": query, "num": self.max_results }))
                .send()
                .await
                .map_err(|e| request_error("serper", self.timeout_secs, e))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| request_error("serper", self.timeout_secs, e))?;
            if !status.is_success() {
                return Err(DelveError::ToolExecution {
                    tool: "serper".into(),
                    message: format!("HTTP {}: {}", status.as_u16(), body),
                });
            }
            parse_serper(&body, self.max_results)
        })
    }
}

/// Tavily search API.
pub struct TavilySearch {
    api_key: String,
    max_results: usize,
    timeout_secs: u64,
    http: reqwest::Client,
}

impl TavilySearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        Ok(Self {
            api_key: config.api_key.clone(),
            max_results: config.max_results,
            timeout_secs: config.timeout_secs,
            http: http_client(config.timeout_secs)?,
        })
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

fn parse_tavily(body: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let resp: TavilyResponse =
        serde_json::from_str(body).map_err(|e| DelveError::ToolExecution {
            tool: "tavily".into(),
            message: format!("unexpected response: {}", e),
        })?;
    Ok(resp
        .results
        .into_iter()
        .take(limit)
        .map(|r| SearchHit {
            url: r.url,
            title: r.title,
            snippet: r.content,
        })
        .collect())
}

impl SearchTool for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
        Box::pin(async move {
            debug!(query, "Tavily search");
            let resp = self
                .http
                .post(TAVILY_URL)
                .json(&json!({
                    "api_key": self.api_key,
                    "query": query,
                    "max_results": self.max_results,
                }))
                .send()
                .await
                .map_err(|e| request_error("tavily", self.timeout_secs, e))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| request_error("tavily", self.timeout_secs, e))?;
            if !status.is_success() {
                return Err(DelveError::ToolExecution {
                    tool: "tavily".into(),
                    message: format!("HTTP {}: {}", status.as_u16(), body),
                });
            }
            parse_tavily(&body, self.max_results)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serper_organic() {
        let body = r#"{
            "searchParameters": {"q": "rust"},
            "organic": [
                {"title": "Rust", "link": "https://www.rust-lang.org", "snippet": "A language", "position": 1},
                {"title": "Book", "link": "https://doc.rust-lang.org/book/", "position": 2},
                {"title": "Extra", "link": "https://example.com"}
            ]
        }"#;
        let hits = parse_serper(body, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://www.rust-lang.org");
        assert_eq!(hits[1].snippet, "");
    }

    #[test]
    fn test_parse_serper_no_results() {
        let hits = parse_serper(r#"{"searchParameters": {}}"#, 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_parse_tavily() {
        let body = r#"{"results": [{"title": "T", "url": "https://t.example", "content": "c", "score": 0.9}]}"#;
        let hits = parse_tavily(body, 5).unwrap();
        assert_eq!(hits[0].snippet, "c");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = WebSearchConfig {
            provider: "bing".into(),
            api_key: "k".into(),
            max_results: 5,
            timeout_secs: 10,
        };
        assert!(matches!(
            create_search_tool(&config),
            Err(DelveError::Config(_))
        ));
    }
}
