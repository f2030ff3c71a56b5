use tracing::warn;

use delve_core::error::Result;

use super::Collaborators;
use crate::prompts;
use crate::schema::{selection_schema, Selection};
use crate::state::{StepOutput, WorkflowState};

pub(super) async fn run(state: &WorkflowState, deps: &Collaborators) -> Result<StepOutput> {
    let results = state.latest_search_results();
    let previous = state.selection_history();

    let selection: Selection = deps
        .generator
        .generate_structured(
            &prompts::selector(
                results.map(Vec::as_slice),
                state.latest_feedback(),
                &previous,
            ),
            &prompts::question(state.research_question()),
            &selection_schema(),
        )
        .await?;

    let listed = results.is_some_and(|hits| {
        hits.iter()
            .any(|h| h.url == selection.selected_page_url)
    });
    if !listed {
        warn!(url = %selection.selected_page_url, "Selected URL is not among the search results");
    }
    Ok(StepOutput::Selection(selection))
}
