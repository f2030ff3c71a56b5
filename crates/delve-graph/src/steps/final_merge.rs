use delve_core::error::Result;

use super::Collaborators;
use crate::prompts;
use crate::state::{StepOutput, WorkflowState};

pub(super) async fn run(state: &WorkflowState, deps: &Collaborators) -> Result<StepOutput> {
    let partial = state.partial_answers();
    let sources = prompts::final_merge_sources(
        partial.direct.as_deref(),
        partial.pdf.as_deref(),
        partial.web.as_deref(),
    );
    let answer = deps
        .generator
        .generate(
            &prompts::final_merge(&sources),
            &prompts::question(state.research_question()),
        )
        .await?;
    Ok(StepOutput::FinalAnswer(answer))
}
