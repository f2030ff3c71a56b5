//! System and user prompts for every text-generation call the graph makes.
//!
//! Each system prompt opens with a fixed role line so transcripts (and
//! scripted test backends) can tell the calls apart.

use chrono::Utc;

use delve_core::types::{ChunkKind, ChunkRef, ScrapedPage, SearchHit};

use crate::schema::{Plan, ReviewVerdict, Selection};

/// Stand-in for any input that is missing or empty.
pub const NO_CONTENT: &str = "NO CONTENT";

pub const DIRECT_ANSWER_ROLE: &str = "You answer research questions from your own knowledge.";
pub const PDF_ANSWER_ROLE: &str = "You answer research questions from excerpts of a document.";
pub const PLANNER_ROLE: &str = "You plan web research.";
pub const SELECTOR_ROLE: &str = "You pick the single best search result to read.";
pub const REPORTER_ROLE: &str = "You write research reports from scraped web pages.";
pub const REVIEWER_ROLE: &str = "You review candidate answers to a research question.";
pub const ROUTER_ROLE: &str = "You route a research workflow after a review.";
pub const FINAL_MERGE_ROLE: &str = "You merge candidate answers into one final answer.";
pub const TEXT_SUMMARY_ROLE: &str = "You summarize a passage of a document for retrieval.";
pub const TABLE_SUMMARY_ROLE: &str = "You summarize a table from a document for retrieval.";
pub const IMAGE_SUMMARY_ROLE: &str = "You describe an image from a document for retrieval.";

fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M UTC").to_string()
}

/// `value` itself, or [`NO_CONTENT`] when absent or blank.
pub fn or_no_content(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => NO_CONTENT.to_string(),
    }
}

/// Numbered list of `items`, or [`NO_CONTENT`] when empty.
fn numbered<T: AsRef<str>>(items: &[T]) -> String {
    let items: Vec<&str> = items
        .iter()
        .map(|s| s.as_ref())
        .filter(|s| !s.trim().is_empty())
        .collect();
    if items.is_empty() {
        return NO_CONTENT.to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn question(research_question: &str) -> String {
    format!("Research question: {}", research_question)
}

pub fn direct_answer() -> String {
    format!(
        "{DIRECT_ANSWER_ROLE}\n\
         Current date: {}.\n\
         Answer the question as accurately and completely as you can. \
         Say plainly when you are unsure or when the answer depends on recent events.",
        now()
    )
}

pub fn pdf_answer(chunks: &[ChunkRef]) -> String {
    let excerpts: Vec<String> = chunks
        .iter()
        .map(|c| format!("[{}] {}", kind_label(c.kind), c.content))
        .collect();
    format!(
        "{PDF_ANSWER_ROLE}\n\
         Current date: {}.\n\
         Use only the excerpts below. Put your answer in `pdf_summary` and copy \
         the passages you relied on into `context`.\n\n\
         Excerpts:\n{}",
        now(),
        numbered(&excerpts)
    )
}

pub fn text_summary() -> String {
    format!(
        "{TEXT_SUMMARY_ROLE}\n\
         Write a dense summary of the passage that keeps every name, number and claim \
         someone might search for. Reply with the summary only."
    )
}

pub fn table_summary() -> String {
    format!(
        "{TABLE_SUMMARY_ROLE}\n\
         Describe what the table measures, its columns and its notable values. \
         Reply with the summary only."
    )
}

pub fn image_summary() -> String {
    format!(
        "{IMAGE_SUMMARY_ROLE}\n\
         Say what the image shows: chart type, axes, labels, values, trends, or the \
         objects and text in it. Reply with the description only.\n\
         Current date: {}",
        now()
    )
}

/// User text sent along with an image chunk.
pub const IMAGE_SUMMARY_REQUEST: &str = "Describe the attached image.";

pub fn planner(latest_feedback: Option<&str>) -> String {
    format!(
        "{PLANNER_ROLE}\n\
         Current date: {}.\n\
         Choose one web search query that will surface pages answering the question. \
         If there is reviewer feedback, adjust the query to address it.\n\n\
         Reviewer feedback: {}",
        now(),
        or_no_content(latest_feedback)
    )
}

pub fn selector(
    results: Option<&[SearchHit]>,
    latest_feedback: Option<&str>,
    previous: &[&Selection],
) -> String {
    let serp: Vec<String> = results
        .unwrap_or_default()
        .iter()
        .map(|h| format!("{}\nURL: {}\n{}", h.title, h.url, h.snippet))
        .collect();
    let previous: Vec<String> = previous
        .iter()
        .map(|s| format!("{} ({})", s.selected_page_url, s.reason_for_selection))
        .collect();
    format!(
        "{SELECTOR_ROLE}\n\
         Current date: {}.\n\
         Select the result most likely to answer the question. Do not pick a page \
         that was already selected unless nothing else is relevant. Copy its URL exactly.\n\n\
         Search results:\n{}\n\n\
         Previous selections:\n{}\n\n\
         Reviewer feedback: {}",
        now(),
        numbered(&serp),
        numbered(&previous),
        or_no_content(latest_feedback)
    )
}

pub fn reporter(
    page: Option<&ScrapedPage>,
    latest_feedback: Option<&str>,
    previous: &[&String],
) -> String {
    let research = match page {
        Some(p) => match (&p.extracted_text, &p.failure) {
            (_, Some(reason)) => format!("{} (could not read {}: {})", NO_CONTENT, p.url, reason),
            (Some(text), None) if !text.trim().is_empty() => {
                format!("Source: {}\n\n{}", p.url, text)
            }
            _ => NO_CONTENT.to_string(),
        },
        None => NO_CONTENT.to_string(),
    };
    format!(
        "{REPORTER_ROLE}\n\
         Current date: {}.\n\
         Answer the question using the research below and cite the source URL. \
         Address the reviewer feedback and improve on previous reports.\n\n\
         Research:\n{}\n\n\
         Previous reports:\n{}\n\n\
         Reviewer feedback: {}",
        now(),
        research,
        numbered(previous),
        or_no_content(latest_feedback)
    )
}

pub fn reviewer(
    direct: Option<&str>,
    pdf: Option<&str>,
    report: Option<&str>,
    previous: &[&ReviewVerdict],
) -> String {
    let feedback: Vec<&str> = previous.iter().map(|v| v.feedback.as_str()).collect();
    format!(
        "{REVIEWER_ROLE}\n\
         Current date: {}.\n\
         Judge whether the candidate answers together resolve the question. Copy each \
         candidate verbatim into its field. Set pass_review to true only if the answer \
         is correct, complete and relevant; otherwise explain in feedback what is missing \
         and whether a new search or a different page from the current results would help.\n\n\
         Direct answer:\n{}\n\n\
         Document answer:\n{}\n\n\
         Web report:\n{}\n\n\
         Your previous feedback:\n{}",
        now(),
        or_no_content(direct),
        or_no_content(pdf),
        or_no_content(report),
        numbered(&feedback)
    )
}

pub fn router(verdict: &ReviewVerdict, has_search_results: bool) -> String {
    format!(
        "{ROUTER_ROLE}\n\
         Pick the next step:\n\
         - planner: a new web search is needed\n\
         - selector: the current search results contain a better page than the one used\n\
         - final_answer: the review passed\n\n\
         Review passed: {}\n\
         Current search results available: {}\n\
         Review feedback: {}",
        verdict.pass_review,
        has_search_results,
        or_no_content(Some(&verdict.feedback))
    )
}

/// Labelled candidate answers for the final merge. Only sources that
/// exist are listed.
pub fn final_merge_sources(direct: Option<&str>, pdf: Option<&str>, web: Option<&str>) -> String {
    let mut sections = Vec::new();
    for (label, body) in [
        ("Direct answer", direct),
        ("Document answer", pdf),
        ("Web report", web),
    ] {
        if let Some(body) = body.filter(|b| !b.trim().is_empty()) {
            sections.push(format!("## {}\n{}", label, body));
        }
    }
    if sections.is_empty() {
        return NO_CONTENT.to_string();
    }
    sections.join("\n\n")
}

pub fn final_merge(sources: &str) -> String {
    format!(
        "{FINAL_MERGE_ROLE}\n\
         Current date: {}.\n\
         Combine the candidate answers below into one answer. Use every candidate; \
         where they disagree, prefer the document and web sources and keep their \
         citations.\n\n\
         {}",
        now(),
        sources
    )
}

pub fn plan_summary(plan: &Plan) -> String {
    format!("{} ({})", plan.search_term, plan.overall_strategy)
}

fn kind_label(kind: ChunkKind) -> &'static str {
    match kind {
        ChunkKind::Text => "text",
        ChunkKind::Table => "table",
        ChunkKind::Image => "image",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_no_content() {
        assert_eq!(or_no_content(None), NO_CONTENT);
        assert_eq!(or_no_content(Some("   ")), NO_CONTENT);
        assert_eq!(or_no_content(Some("x")), "x");
    }

    #[test]
    fn test_role_lines_lead_each_prompt() {
        assert!(direct_answer().starts_with(DIRECT_ANSWER_ROLE));
        assert!(planner(None).starts_with(PLANNER_ROLE));
        assert!(final_merge("x").starts_with(FINAL_MERGE_ROLE));
        assert!(text_summary().starts_with(TEXT_SUMMARY_ROLE));
        assert!(image_summary().starts_with(IMAGE_SUMMARY_ROLE));
    }

    #[test]
    fn test_missing_inputs_become_marker() {
        let p = selector(None, None, &[]);
        assert!(p.contains(&format!("Search results:\n{}", NO_CONTENT)));
        assert!(p.contains(&format!("Previous selections:\n{}", NO_CONTENT)));
        assert!(p.contains(&format!("Reviewer feedback: {}", NO_CONTENT)));
    }

    #[test]
    fn test_failed_scrape_is_marked() {
        let page = ScrapedPage::failed("https://x.example", "HTTP 404 Not Found");
        let p = reporter(Some(&page), None, &[]);
        assert!(p.contains("could not read https://x.example"));
    }

    #[test]
    fn test_final_merge_lists_only_available_sources() {
        let s = final_merge_sources(Some("direct"), None, Some("web"));
        assert!(s.contains("## Direct answer"));
        assert!(s.contains("## Web report"));
        assert!(!s.contains("## Document answer"));
        assert_eq!(final_merge_sources(None, Some(" "), None), NO_CONTENT);
    }

    #[test]
    fn test_pdf_excerpts_labelled_by_kind() {
        let chunks = vec![ChunkRef {
            doc_id: "1".into(),
            kind: ChunkKind::Table,
            content: "| A | B |".into(),
            score: 1.0,
        }];
        assert!(pdf_answer(&chunks).contains("1. [table] | A | B |"));
    }
}
