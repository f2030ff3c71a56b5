use serde::{Deserialize, Serialize};

use delve_core::config::EntryMode;
use delve_core::error::{DelveError, Result};

use crate::schema::RouteTarget;
use crate::state::WorkflowState;
use crate::step::StepId;

/// An edge connecting two steps of the research graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: StepId,
    pub to: StepId,
    #[serde(default)]
    pub condition: EdgeCondition,
}

/// Condition for traversing an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Always traverse this edge.
    #[default]
    Always,
    /// Traverse if the latest route decision names `target`.
    Route { target: RouteTarget },
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(from: StepId, to: StepId) -> Self {
        Self {
            from,
            to,
            condition: EdgeCondition::Always,
        }
    }

    /// Create an edge taken when the router picked `target`.
    pub fn on_route(from: StepId, target: RouteTarget, to: StepId) -> Self {
        Self {
            from,
            to,
            condition: EdgeCondition::Route { target },
        }
    }

    fn matches(&self, state: &WorkflowState) -> bool {
        match &self.condition {
            EdgeCondition::Always => true,
            EdgeCondition::Route { target } => state
                .latest_route()
                .is_some_and(|decision| decision.next_step == *target),
        }
    }
}

/// The fixed step graph.
#[derive(Debug, Clone)]
pub struct Topology {
    edges: Vec<Edge>,
}

impl Topology {
    /// Direct/PDF answers feed the reviewer; the web loop runs
    /// planner → search → selector → scrape → reporter → reviewer; every
    /// review goes to the router, which picks the planner, the selector or
    /// the final merge.
    pub fn research() -> Self {
        use StepId::*;
        Self {
            edges: vec![
                Edge::always(DirectAnswer, Reviewer),
                Edge::always(PdfAnswer, Reviewer),
                Edge::always(Planner, Search),
                Edge::always(Search, Selector),
                Edge::always(Selector, Scrape),
                Edge::always(Scrape, Reporter),
                Edge::always(Reporter, Reviewer),
                Edge::always(Reviewer, Router),
                Edge::on_route(Router, RouteTarget::Planner, Planner),
                Edge::on_route(Router, RouteTarget::Selector, Selector),
                Edge::on_route(Router, RouteTarget::FinalAnswer, FinalMerge),
                Edge::always(FinalMerge, End),
            ],
        }
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// First step of a run, decided once before anything executes.
    /// An attached document always wins.
    pub fn entry(pdf_path: Option<&str>, mode: EntryMode) -> StepId {
        match (pdf_path, mode) {
            (Some(_), _) => StepId::PdfAnswer,
            (None, EntryMode::Direct) => StepId::DirectAnswer,
            (None, EntryMode::Search) => StepId::Planner,
        }
    }

    /// Follow the first matching outgoing edge of `from`.
    pub fn next(&self, from: StepId, state: &WorkflowState) -> Result<StepId> {
        if from == StepId::End {
            return Ok(StepId::End);
        }
        self.edges
            .iter()
            .filter(|e| e.from == from)
            .find(|e| e.matches(state))
            .map(|e| e.to)
            .ok_or_else(|| DelveError::Graph(format!("no edge out of '{}' matches the state", from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RouteDecision;
    use crate::state::StepOutput;

    fn routed(target: RouteTarget) -> WorkflowState {
        let mut state = WorkflowState::new("q", None);
        state
            .apply(
                StepId::Router,
                StepOutput::Route(RouteDecision {
                    next_step: target,
                    reason: String::new(),
                }),
            )
            .unwrap();
        state
    }

    #[test]
    fn test_entry_rules() {
        assert_eq!(
            Topology::entry(Some("a.pdf"), EntryMode::Search),
            StepId::PdfAnswer
        );
        assert_eq!(
            Topology::entry(Some("a.pdf"), EntryMode::Direct),
            StepId::PdfAnswer
        );
        assert_eq!(Topology::entry(None, EntryMode::Direct), StepId::DirectAnswer);
        assert_eq!(Topology::entry(None, EntryMode::Search), StepId::Planner);
    }

    #[test]
    fn test_fixed_chain() {
        let topo = Topology::research();
        let state = WorkflowState::new("q", None);
        let mut step = StepId::Planner;
        let mut seen = vec![step];
        while step != StepId::Router {
            step = topo.next(step, &state).unwrap();
            seen.push(step);
        }
        use StepId::*;
        assert_eq!(
            seen,
            vec![Planner, Search, Selector, Scrape, Reporter, Reviewer, Router]
        );
        assert_eq!(topo.next(DirectAnswer, &state).unwrap(), Reviewer);
        assert_eq!(topo.next(PdfAnswer, &state).unwrap(), Reviewer);
        assert_eq!(topo.next(FinalMerge, &state).unwrap(), End);
        assert_eq!(topo.next(End, &state).unwrap(), End);
    }

    #[test]
    fn test_router_edges_follow_decision() {
        let topo = Topology::research();
        assert_eq!(
            topo.next(StepId::Router, &routed(RouteTarget::Planner)).unwrap(),
            StepId::Planner
        );
        assert_eq!(
            topo.next(StepId::Router, &routed(RouteTarget::Selector)).unwrap(),
            StepId::Selector
        );
        assert_eq!(
            topo.next(StepId::Router, &routed(RouteTarget::FinalAnswer)).unwrap(),
            StepId::FinalMerge
        );
    }

    #[test]
    fn test_router_without_decision_is_graph_error() {
        let topo = Topology::research();
        let err = topo
            .next(StepId::Router, &WorkflowState::new("q", None))
            .unwrap_err();
        assert!(matches!(err, DelveError::Graph(_)));
    }

    #[test]
    fn test_every_step_but_end_has_an_exit() {
        let topo = Topology::research();
        for step in StepId::ALL {
            let has_exit = topo.edges().iter().any(|e| e.from == step);
            assert_eq!(has_exit, step != StepId::End, "{step}");
        }
    }

    #[test]
    fn test_edge_serde_shape() {
        let edge = Edge::on_route(StepId::Router, RouteTarget::Selector, StepId::Selector);
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["from"], "router");
        assert_eq!(json["condition"]["type"], "route");
        assert_eq!(json["condition"]["target"], "selector");
    }
}
