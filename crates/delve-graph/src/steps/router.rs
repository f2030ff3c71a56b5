use tracing::debug;

use delve_core::error::{DelveError, Result};

use super::Collaborators;
use crate::prompts;
use crate::router::decide;
use crate::schema::{route_schema, RouteDecision};
use crate::state::{StepOutput, WorkflowState};

/// Asks the backend for a route, then lets [`decide`] have the last word.
pub(super) async fn run(state: &WorkflowState, deps: &Collaborators) -> Result<StepOutput> {
    let verdict = state
        .latest_review()
        .ok_or_else(|| DelveError::Graph("router reached before any review".into()))?;
    let has_results = state.has_search_results();

    let suggested: RouteDecision = deps
        .generator
        .generate_structured(
            &prompts::router(verdict, has_results),
            &prompts::question(state.research_question()),
            &route_schema(),
        )
        .await?;

    let next_step = decide(verdict, suggested.next_step, has_results);
    if next_step != suggested.next_step {
        debug!(
            suggested = %suggested.next_step,
            chosen = %next_step,
            "Route overridden"
        );
    }
    Ok(StepOutput::Route(RouteDecision {
        next_step,
        reason: suggested.reason,
    }))
}
