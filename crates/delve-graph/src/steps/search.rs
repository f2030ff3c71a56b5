use tracing::info;

use delve_core::error::{DelveError, Result};

use super::Collaborators;
use crate::state::{StepOutput, WorkflowState};

pub(super) async fn run(state: &WorkflowState, deps: &Collaborators) -> Result<StepOutput> {
    let plan = state
        .latest_plan()
        .ok_or_else(|| DelveError::Graph("search reached before any plan".into()))?;
    let tool = deps.search.as_ref().ok_or_else(|| {
        DelveError::Config("web search is not configured; add a [web_search] section".into())
    })?;

    let hits = tool.search(&plan.search_term).await?;
    info!(
        tool = tool.name(),
        query = %plan.search_term,
        results = hits.len(),
        "Search complete"
    );
    Ok(StepOutput::SearchResults(hits))
}
