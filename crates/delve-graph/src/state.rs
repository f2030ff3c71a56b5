use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use delve_core::error::{DelveError, Result};
use delve_core::types::{ScrapedPage, SearchHit};

use crate::schema::{PdfAnswer, Plan, ReviewVerdict, RouteDecision, Selection};
use crate::step::{Slot, StepId};

/// The value a step writes into its slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepOutput {
    DirectAnswer(String),
    PdfAnswer(PdfAnswer),
    Plan(Plan),
    SearchResults(Vec<SearchHit>),
    Selection(Selection),
    Scraped(ScrapedPage),
    Report(String),
    Review(ReviewVerdict),
    Route(RouteDecision),
    FinalAnswer(String),
}

impl StepOutput {
    pub fn slot(&self) -> Slot {
        match self {
            StepOutput::DirectAnswer(_) => Slot::DirectAnswerResponse,
            StepOutput::PdfAnswer(_) => Slot::PdfAnswerResponse,
            StepOutput::Plan(_) => Slot::PlannerResponse,
            StepOutput::SearchResults(_) => Slot::SearchResults,
            StepOutput::Selection(_) => Slot::SelectorResponse,
            StepOutput::Scraped(_) => Slot::ScrapedContent,
            StepOutput::Report(_) => Slot::ReporterResponse,
            StepOutput::Review(_) => Slot::ReviewResponse,
            StepOutput::Route(_) => Slot::RouteResponse,
            StepOutput::FinalAnswer(_) => Slot::FinalAnswer,
        }
    }
}

/// Shared state threaded through one workflow invocation.
///
/// Every slot keeps its full write history, oldest first; the latest
/// value is the last entry. Nothing is ever removed or rewritten, and a
/// slot only accepts writes from the step that owns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    research_question: String,
    #[serde(default)]
    pdf_path: Option<String>,
    #[serde(default)]
    slots: BTreeMap<Slot, Vec<StepOutput>>,
}

/// Latest candidate answers, for callers that stop before the final merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartialAnswers {
    pub direct: Option<String>,
    pub pdf: Option<String>,
    pub web: Option<String>,
}

impl PartialAnswers {
    pub fn is_empty(&self) -> bool {
        self.direct.is_none() && self.pdf.is_none() && self.web.is_none()
    }
}

macro_rules! typed_latest {
    ($(#[$doc:meta])* $name:ident, $slot:expr, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&self) -> Option<&$ty> {
            match self.get($slot) {
                Some(StepOutput::$variant(v)) => Some(v),
                _ => None,
            }
        }
    };
}

macro_rules! typed_history {
    ($name:ident, $slot:expr, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Vec<&$ty> {
            self.history($slot)
                .iter()
                .filter_map(|o| match o {
                    StepOutput::$variant(v) => Some(v),
                    _ => None,
                })
                .collect()
        }
    };
}

impl WorkflowState {
    pub fn new(research_question: impl Into<String>, pdf_path: Option<String>) -> Self {
        Self {
            research_question: research_question.into(),
            // An empty path means no document.
            pdf_path: pdf_path.filter(|p| !p.trim().is_empty()),
            slots: BTreeMap::new(),
        }
    }

    pub fn research_question(&self) -> &str {
        &self.research_question
    }

    pub fn pdf_path(&self) -> Option<&str> {
        self.pdf_path.as_deref()
    }

    /// Latest value written to `slot`.
    pub fn get(&self, slot: Slot) -> Option<&StepOutput> {
        self.slots.get(&slot).and_then(|h| h.last())
    }

    /// Every value ever written to `slot`, oldest first.
    pub fn history(&self, slot: Slot) -> &[StepOutput] {
        self.slots.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record `output` as written by `step`.
    ///
    /// Fails without touching the state if `step` does not own the slot.
    pub fn apply(&mut self, step: StepId, output: StepOutput) -> Result<()> {
        let slot = output.slot();
        if slot.owner() != step {
            return Err(DelveError::SlotOwnership {
                step: step.to_string(),
                slot: slot.to_string(),
            });
        }
        self.slots.entry(slot).or_default().push(output);
        Ok(())
    }

    /// Total number of writes across all slots.
    pub fn writes(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }

    typed_latest!(direct_answer, Slot::DirectAnswerResponse, DirectAnswer, String);
    typed_latest!(pdf_answer, Slot::PdfAnswerResponse, PdfAnswer, PdfAnswer);
    typed_latest!(latest_plan, Slot::PlannerResponse, Plan, Plan);
    typed_latest!(latest_search_results, Slot::SearchResults, SearchResults, Vec<SearchHit>);
    typed_latest!(latest_selection, Slot::SelectorResponse, Selection, Selection);
    typed_latest!(latest_scrape, Slot::ScrapedContent, Scraped, ScrapedPage);
    typed_latest!(latest_report, Slot::ReporterResponse, Report, String);
    typed_latest!(
        /// The verdict the router acts on.
        latest_review,
        Slot::ReviewResponse,
        Review,
        ReviewVerdict
    );
    typed_latest!(latest_route, Slot::RouteResponse, Route, RouteDecision);
    typed_latest!(final_answer, Slot::FinalAnswer, FinalAnswer, String);

    typed_history!(plan_history, Slot::PlannerResponse, Plan, Plan);
    typed_history!(selection_history, Slot::SelectorResponse, Selection, Selection);
    typed_history!(report_history, Slot::ReporterResponse, Report, String);
    typed_history!(review_history, Slot::ReviewResponse, Review, ReviewVerdict);
    typed_history!(route_history, Slot::RouteResponse, Route, RouteDecision);

    /// Feedback of the latest review, if any.
    pub fn latest_feedback(&self) -> Option<&str> {
        self.latest_review().map(|r| r.feedback.as_str())
    }

    /// True once any search in this run returned at least one hit.
    pub fn has_search_results(&self) -> bool {
        self.latest_search_results().is_some_and(|hits| !hits.is_empty())
    }

    pub fn partial_answers(&self) -> PartialAnswers {
        PartialAnswers {
            direct: self.direct_answer().cloned(),
            pdf: self.pdf_answer().map(|a| a.pdf_summary.clone()),
            web: self.latest_report().cloned(),
        }
    }
}
