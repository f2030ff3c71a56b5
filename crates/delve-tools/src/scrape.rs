use std::sync::OnceLock;
use std::time::Duration;

use futures::future::BoxFuture;
use regex::Regex;
use tracing::{debug, warn};

use delve_core::config::ScrapeConfig;
use delve_core::error::{DelveError, Result};
use delve_core::traits::ScrapeTool;
use delve_core::types::ScrapedPage;

/// Fetches a page over HTTP and reduces it to readable text.
pub struct WebScraper {
    http: reqwest::Client,
    max_chars: usize,
}

impl WebScraper {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| DelveError::ToolExecution {
                tool: "scrape".to_string(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            max_chars: config.max_chars,
        })
    }

    async fn fetch(&self, url: &str) -> std::result::Result<String, String> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("unsupported URL scheme: {}", url));
        }

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = resp
            .text()
            .await
            .map_err(|e| format!("Failed to read response body: {}", e))?;

        let text = if content_type.contains("html") || body.trim_start().starts_with('<') {
            strip_html_tags(&body)
        } else {
            body
        };

        if text.trim().is_empty() {
            return Err("page has no readable text".into());
        }
        Ok(truncate_chars(&text, self.max_chars))
    }
}

impl ScrapeTool for WebScraper {
    fn scrape<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ScrapedPage> {
        Box::pin(async move {
            debug!(url, "Scraping page");
            match self.fetch(url).await {
                Ok(text) => ScrapedPage::success(url, text),
                Err(reason) => {
                    warn!(url, reason = %reason, "Scrape failed");
                    ScrapedPage::failed(url, reason)
                }
            }
        })
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n\n[truncated at {} chars]", &text[..idx], max_chars),
        None => text.to_string(),
    }
}

struct HtmlPatterns {
    script: Regex,
    style: Regex,
    block: Regex,
    tags: Regex,
    blank_lines: Regex,
    spaces: Regex,
}

fn patterns() -> &'static HtmlPatterns {
    static PATTERNS: OnceLock<HtmlPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| HtmlPatterns {
        script: Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid regex"),
        style: Regex::new(r"(?is)<(style|noscript)[^>]*>.*?</(style|noscript)>")
            .expect("valid regex"),
        block: Regex::new(r"(?i)</?(p|div|br|li|h[1-6]|tr|section|article)[^>]*>")
            .expect("valid regex"),
        tags: Regex::new(r"<[^>]+>").expect("valid regex"),
        blank_lines: Regex::new(r"\n\s*\n(\s*\n)+").expect("valid regex"),
        spaces: Regex::new(r"[ \t]{2,}").expect("valid regex"),
    })
}

/// Reduce an HTML document to plain text.
pub fn strip_html_tags(html: &str) -> String {
    let p = patterns();
    let cleaned = p.script.replace_all(html, "");
    let cleaned = p.style.replace_all(&cleaned, "");
    // Keep paragraph structure
    let cleaned = p.block.replace_all(&cleaned, "\n");
    let text = p.tags.replace_all(&cleaned, "");

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let text = p.spaces.replace_all(&text, " ");
    let text = p.blank_lines.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_drops_scripts_and_tags() {
        let html = r#"<html><head><style>p{color:red}</style><script>var x = 1;</script></head>
<body><h1>Title</h1><p>Fish &amp; chips</p></body></html>"#;
        let text = strip_html_tags(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Fish & chips"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let out = truncate_chars("héllo wörld", 4);
        assert!(out.starts_with("héll"));
        assert!(out.contains("[truncated at 4 chars]"));
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[tokio::test]
    async fn test_bad_scheme_is_failed_page() {
        let scraper = WebScraper::new(&ScrapeConfig::default()).unwrap();
        let page = scraper.scrape("ftp://example.com/file").await;
        assert!(page.is_failed());
        assert_eq!(page.url, "ftp://example.com/file");
    }
}
