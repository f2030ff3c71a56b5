use tracing::debug;

use delve_core::error::Result;

use super::Collaborators;
use crate::prompts;
use crate::schema::{plan_schema, Plan};
use crate::state::{StepOutput, WorkflowState};

pub(super) async fn run(state: &WorkflowState, deps: &Collaborators) -> Result<StepOutput> {
    let plan: Plan = deps
        .generator
        .generate_structured(
            &prompts::planner(state.latest_feedback()),
            &prompts::question(state.research_question()),
            &plan_schema(),
        )
        .await?;
    debug!(plan = %prompts::plan_summary(&plan), "Planned search");
    Ok(StepOutput::Plan(plan))
}
