pub mod pdf;
pub mod scrape;
pub mod search;

pub use pdf::{chunk_document, PdftotextExtractor};
pub use scrape::{strip_html_tags, WebScraper};
pub use search::{create_search_tool, SerperSearch, TavilySearch};
