use tracing::{info, warn};

use delve_core::error::{DelveError, Result};

use super::Collaborators;
use crate::state::{StepOutput, WorkflowState};

/// A page that cannot be read is recorded as such and handed to the
/// reporter; it never fails the step.
pub(super) async fn run(state: &WorkflowState, deps: &Collaborators) -> Result<StepOutput> {
    let selection = state
        .latest_selection()
        .ok_or_else(|| DelveError::Graph("scrape reached before any selection".into()))?;

    let page = deps.scraper.scrape(&selection.selected_page_url).await;
    match &page.failure {
        Some(reason) => warn!(url = %page.url, reason = %reason, "Scrape failed"),
        None => info!(
            url = %page.url,
            chars = page.extracted_text.as_deref().map_or(0, |t| t.chars().count()),
            "Scrape complete"
        ),
    }
    Ok(StepOutput::Scraped(page))
}
