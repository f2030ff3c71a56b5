//! The agent steps. Each reads what it needs from [`WorkflowState`],
//! makes one collaborator call and returns the value for its slot. The
//! engine owns the write.

mod direct_answer;
mod final_merge;
mod pdf_answer;
mod planner;
mod reporter;
mod reviewer;
mod router;
mod scrape;
mod search;
mod selector;

use std::sync::Arc;

use delve_core::error::{DelveError, Result};
use delve_core::traits::{EmbeddingProvider, PdfExtractor, ScrapeTool, SearchTool};
use delve_llm::Generator;

use crate::state::{StepOutput, WorkflowState};
use crate::step::StepId;

/// External services the steps call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Generator,
    /// Required only when the run reaches the web loop.
    pub search: Option<Arc<dyn SearchTool>>,
    pub scraper: Arc<dyn ScrapeTool>,
    pub pdf: Arc<dyn PdfExtractor>,
    /// Without one, document retrieval ranks chunks lexically.
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
}

/// Per-run knobs a few steps need.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepSettings {
    pub summary_concurrency: usize,
    pub top_k: usize,
}

pub(crate) async fn execute(
    step: StepId,
    state: &WorkflowState,
    deps: &Collaborators,
    settings: StepSettings,
) -> Result<StepOutput> {
    match step {
        StepId::DirectAnswer => direct_answer::run(state, deps).await,
        StepId::PdfAnswer => pdf_answer::run(state, deps, settings).await,
        StepId::Planner => planner::run(state, deps).await,
        StepId::Search => search::run(state, deps).await,
        StepId::Selector => selector::run(state, deps).await,
        StepId::Scrape => scrape::run(state, deps).await,
        StepId::Reporter => reporter::run(state, deps).await,
        StepId::Reviewer => reviewer::run(state, deps).await,
        StepId::Router => router::run(state, deps).await,
        StepId::FinalMerge => final_merge::run(state, deps).await,
        StepId::End => Err(DelveError::Graph("the end step does not execute".into())),
    }
}
