use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every node of the research graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    DirectAnswer,
    PdfAnswer,
    Planner,
    Search,
    Selector,
    Scrape,
    Reporter,
    Reviewer,
    Router,
    FinalMerge,
    /// Terminal node. Reaching it does not count against the step budget.
    End,
}

impl StepId {
    pub const ALL: [StepId; 11] = [
        StepId::DirectAnswer,
        StepId::PdfAnswer,
        StepId::Planner,
        StepId::Search,
        StepId::Selector,
        StepId::Scrape,
        StepId::Reporter,
        StepId::Reviewer,
        StepId::Router,
        StepId::FinalMerge,
        StepId::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::DirectAnswer => "direct_answer",
            StepId::PdfAnswer => "pdf_answer",
            StepId::Planner => "planner",
            StepId::Search => "search",
            StepId::Selector => "selector",
            StepId::Scrape => "scrape",
            StepId::Reporter => "reporter",
            StepId::Reviewer => "reviewer",
            StepId::Router => "router",
            StepId::FinalMerge => "final_merge",
            StepId::End => "end",
        }
    }

    /// The slot this step writes. `End` writes nothing.
    pub fn output_slot(&self) -> Option<Slot> {
        Some(match self {
            StepId::DirectAnswer => Slot::DirectAnswerResponse,
            StepId::PdfAnswer => Slot::PdfAnswerResponse,
            StepId::Planner => Slot::PlannerResponse,
            StepId::Search => Slot::SearchResults,
            StepId::Selector => Slot::SelectorResponse,
            StepId::Scrape => Slot::ScrapedContent,
            StepId::Reporter => Slot::ReporterResponse,
            StepId::Reviewer => Slot::ReviewResponse,
            StepId::Router => Slot::RouteResponse,
            StepId::FinalMerge => Slot::FinalAnswer,
            StepId::End => return None,
        })
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown step '{}'", s))
    }
}

/// A named slot of the shared workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    DirectAnswerResponse,
    PdfAnswerResponse,
    PlannerResponse,
    SearchResults,
    SelectorResponse,
    ScrapedContent,
    ReporterResponse,
    ReviewResponse,
    RouteResponse,
    FinalAnswer,
}

impl Slot {
    /// The only step allowed to write this slot.
    pub fn owner(&self) -> StepId {
        match self {
            Slot::DirectAnswerResponse => StepId::DirectAnswer,
            Slot::PdfAnswerResponse => StepId::PdfAnswer,
            Slot::PlannerResponse => StepId::Planner,
            Slot::SearchResults => StepId::Search,
            Slot::SelectorResponse => StepId::Selector,
            Slot::ScrapedContent => StepId::Scrape,
            Slot::ReporterResponse => StepId::Reporter,
            Slot::ReviewResponse => StepId::Reviewer,
            Slot::RouteResponse => StepId::Router,
            Slot::FinalAnswer => StepId::FinalMerge,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::DirectAnswerResponse => "direct_answer_response",
            Slot::PdfAnswerResponse => "pdf_answer_response",
            Slot::PlannerResponse => "planner_response",
            Slot::SearchResults => "search_results",
            Slot::SelectorResponse => "selector_response",
            Slot::ScrapedContent => "scraped_content",
            Slot::ReporterResponse => "reporter_response",
            Slot::ReviewResponse => "review_response",
            Slot::RouteResponse => "route_response",
            Slot::FinalAnswer => "final_answer",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_is_one_to_one() {
        for step in StepId::ALL {
            if let Some(slot) = step.output_slot() {
                assert_eq!(slot.owner(), step);
            }
        }
        let owned: std::collections::HashSet<_> =
            StepId::ALL.iter().filter_map(|s| s.output_slot()).collect();
        assert_eq!(owned.len(), 10);
    }

    #[test]
    fn test_step_names_round_trip_through_from_str() {
        for step in StepId::ALL {
            assert_eq!(step.as_str().parse::<StepId>().unwrap(), step);
        }
        assert!("reviewr".parse::<StepId>().is_err());
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&StepId::FinalMerge).unwrap();
        assert_eq!(json, "\"final_merge\"");
        let json = serde_json::to_string(&Slot::ReviewResponse).unwrap();
        assert_eq!(json, "\"review_response\"");
    }
}
