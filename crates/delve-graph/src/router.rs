use crate::schema::{ReviewVerdict, RouteTarget};

/// Resolve where the run goes after a review.
///
/// Precedence, highest first:
/// 1. a passing review always ends the loop (`FinalAnswer`);
/// 2. a request for a different result from the current search
///    (`Selector`) is honoured only if that search returned hits;
/// 3. everything else, including a `FinalAnswer` suggestion for a
///    failed review, runs a new search (`Planner`).
pub fn decide(
    verdict: &ReviewVerdict,
    suggested: RouteTarget,
    has_search_results: bool,
) -> RouteTarget {
    if verdict.pass_review {
        return RouteTarget::FinalAnswer;
    }
    match suggested {
        RouteTarget::Selector if has_search_results => RouteTarget::Selector,
        _ => RouteTarget::Planner,
    }
}
