use tracing::info;

use delve_core::error::Result;

use super::Collaborators;
use crate::prompts;
use crate::schema::{review_schema, ReviewVerdict};
use crate::state::{StepOutput, WorkflowState};

pub(super) async fn run(state: &WorkflowState, deps: &Collaborators) -> Result<StepOutput> {
    let previous = state.review_history();
    let system = prompts::reviewer(
        state.direct_answer().map(String::as_str),
        state.pdf_answer().map(|a| a.pdf_summary.as_str()),
        state.latest_report().map(String::as_str),
        &previous,
    );

    let verdict: ReviewVerdict = deps
        .generator
        .generate_structured(
            &system,
            &prompts::question(state.research_question()),
            &review_schema(),
        )
        .await?;
    info!(
        pass = verdict.pass_review,
        comprehensive = verdict.comprehensive,
        citations = verdict.citations_provided,
        relevant = verdict.relevant_to_research_question,
        round = previous.len() + 1,
        "Review complete"
    );
    Ok(StepOutput::Review(verdict))
}
