use delve_core::error::Result;

use super::Collaborators;
use crate::prompts;
use crate::state::{StepOutput, WorkflowState};

pub(super) async fn run(state: &WorkflowState, deps: &Collaborators) -> Result<StepOutput> {
    let previous = state.report_history();
    let report = deps
        .generator
        .generate(
            &prompts::reporter(state.latest_scrape(), state.latest_feedback(), &previous),
            &prompts::question(state.research_question()),
        )
        .await?;
    Ok(StepOutput::Report(report))
}
