use delve_core::error::Result;

use super::Collaborators;
use crate::prompts;
use crate::state::{StepOutput, WorkflowState};

pub(super) async fn run(state: &WorkflowState, deps: &Collaborators) -> Result<StepOutput> {
    let answer = deps
        .generator
        .generate(
            &prompts::direct_answer(),
            &prompts::question(state.research_question()),
        )
        .await?;
    Ok(StepOutput::DirectAnswer(answer))
}
