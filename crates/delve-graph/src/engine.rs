use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use delve_core::config::WorkflowConfig;
use delve_core::error::{DelveError, Result};
use delve_core::event::EventBus;
use delve_core::types::{RunId, WorkflowEvent};

use crate::edge::Topology;
use crate::state::{PartialAnswers, StepOutput, WorkflowState};
use crate::step::StepId;
use crate::steps::{self, Collaborators, StepSettings};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// The final merge ran; carries its answer.
    Answered(String),
    /// The step budget ran out first. Not an error.
    BudgetExceeded { partial: PartialAnswers },
    /// The router was due but no review exists to route on.
    NoReview,
    /// A step could not produce its output. Nothing was written for it.
    Failed { step: StepId, cause: String },
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Answered(_) => "answered",
            RunStatus::BudgetExceeded { .. } => "budget_exceeded",
            RunStatus::NoReview => "no_review",
            RunStatus::Failed { .. } => "failed",
        }
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub step: StepId,
    pub elapsed_ms: u64,
}

/// Everything a caller gets back from a run.
///
/// `state` and `next_step` are enough to pick the run up again with
/// [`WorkflowEngine::resume`].
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub state: WorkflowState,
    /// The step the run stopped before.
    pub next_step: StepId,
    pub steps_executed: usize,
    pub trace: Vec<TraceEntry>,
}

impl WorkflowOutcome {
    pub fn answer(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Answered(answer) => Some(answer),
            _ => None,
        }
    }

    /// Executed steps in order.
    pub fn path(&self) -> Vec<StepId> {
        self.trace.iter().map(|t| t.step).collect()
    }
}

/// Drives the research topology for one question at a time.
///
/// Steps run strictly one after another. Each run gets its own state and
/// step counter, so one engine can serve concurrent runs.
pub struct WorkflowEngine {
    deps: Collaborators,
    config: WorkflowConfig,
    top_k: usize,
    topology: Topology,
    event_bus: Option<Arc<EventBus>>,
}

impl WorkflowEngine {
    pub fn new(deps: Collaborators, config: WorkflowConfig) -> Self {
        Self {
            deps,
            config,
            top_k: 4,
            topology: Topology::research(),
            event_bus: None,
        }
    }

    /// Number of document chunks handed to the PDF answer step.
    pub fn with_pdf_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Answer `question`, executing at most `max_steps` steps.
    pub async fn run(
        &self,
        question: &str,
        pdf_path: Option<String>,
        max_steps: usize,
    ) -> WorkflowOutcome {
        let state = WorkflowState::new(question, pdf_path);
        let entry = Topology::entry(state.pdf_path(), self.config.entry);
        info!(entry = %entry, max_steps, "Starting research run");
        self.drive(state, entry, max_steps).await
    }

    /// Continue a previous run from `next` with a fresh budget.
    pub async fn resume(
        &self,
        state: WorkflowState,
        next: StepId,
        max_steps: usize,
    ) -> WorkflowOutcome {
        info!(next = %next, writes = state.writes(), max_steps, "Resuming research run");
        self.drive(state, next, max_steps).await
    }

    async fn drive(
        &self,
        mut state: WorkflowState,
        mut next: StepId,
        max_steps: usize,
    ) -> WorkflowOutcome {
        let run_id = RunId::new();
        let run_start = Instant::now();
        let mut trace: Vec<TraceEntry> = Vec::new();
        let settings = StepSettings {
            summary_concurrency: self.config.summary_concurrency,
            top_k: self.top_k,
        };

        self.publish(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
            question: state.research_question().to_string(),
            pdf_path: state.pdf_path().map(str::to_string),
        });

        let status = loop {
            if next == StepId::End {
                match state.final_answer() {
                    Some(answer) => break RunStatus::Answered(answer.clone()),
                    None => {
                        break RunStatus::Failed {
                            step: StepId::End,
                            cause: "reached the end without a final answer".into(),
                        }
                    }
                }
            }
            if next == StepId::Router && state.latest_review().is_none() {
                warn!(run_id = %run_id, "Router due but nothing has been reviewed");
                break RunStatus::NoReview;
            }
            if trace.len() >= max_steps {
                warn!(run_id = %run_id, max_steps, next = %next, "Step budget exhausted");
                break RunStatus::BudgetExceeded {
                    partial: state.partial_answers(),
                };
            }

            let index = trace.len();
            self.publish(WorkflowEvent::StepStarted {
                run_id: run_id.clone(),
                step: next.to_string(),
                index,
            });
            info!(run_id = %run_id, step = %next, index, "Executing step");

            let step_start = Instant::now();
            let output = match self.attempt(&run_id, next, &state, settings).await {
                Ok(output) => output,
                Err(e) => break self.fail(&run_id, next, e),
            };
            let elapsed_ms = step_start.elapsed().as_millis() as u64;

            let slot = output.slot();
            let delta = serde_json::to_value(&output).unwrap_or(serde_json::Value::Null);
            if let StepOutput::Route(decision) = &output {
                self.publish(WorkflowEvent::RouteChosen {
                    run_id: run_id.clone(),
                    next_step: decision.next_step.to_string(),
                    reason: decision.reason.clone(),
                });
            }
            if let Err(e) = state.apply(next, output) {
                break self.fail(&run_id, next, e);
            }

            trace.push(TraceEntry {
                step: next,
                elapsed_ms,
            });
            self.publish(WorkflowEvent::StepCompleted {
                run_id: run_id.clone(),
                step: next.to_string(),
                index,
                slot: slot.to_string(),
                delta,
                elapsed_ms,
            });
            debug!(run_id = %run_id, step = %next, elapsed_ms, "Step complete");

            next = match self.topology.next(next, &state) {
                Ok(step) => step,
                Err(e) => break self.fail(&run_id, next, e),
            };
        };

        info!(
            run_id = %run_id,
            outcome = status.label(),
            steps = trace.len(),
            elapsed_ms = run_start.elapsed().as_millis() as u64,
            "Research run finished"
        );
        self.publish(WorkflowEvent::RunFinished {
            run_id: run_id.clone(),
            outcome: status.label().to_string(),
            steps_executed: trace.len(),
        });

        WorkflowOutcome {
            run_id,
            status,
            state,
            next_step: next,
            steps_executed: trace.len(),
            trace,
        }
    }

    /// Run `step`, re-issuing it after retryable failures.
    async fn attempt(
        &self,
        run_id: &RunId,
        step: StepId,
        state: &WorkflowState,
        settings: StepSettings,
    ) -> Result<StepOutput> {
        let attempts = self.config.step_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match steps::execute(step, state, &self.deps, settings).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        run_id = %run_id,
                        step = %step,
                        attempt,
                        error = %e,
                        "Step failed, retrying"
                    );
                    self.publish(WorkflowEvent::StepRetry {
                        run_id: run_id.clone(),
                        step: step.to_string(),
                        attempt,
                        error: e.to_string(),
                    });
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fail(&self, run_id: &RunId, step: StepId, e: DelveError) -> RunStatus {
        error!(run_id = %run_id, step = %step, error = %e, "Step failed");
        self.publish(WorkflowEvent::StepFailed {
            run_id: run_id.clone(),
            step: step.to_string(),
            error: e.to_string(),
        });
        RunStatus::Failed {
            step,
            cause: e.to_string(),
        }
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(RunStatus::Answered("a".into()).label(), "answered");
        assert_eq!(RunStatus::NoReview.label(), "no_review");
        assert_eq!(
            RunStatus::BudgetExceeded {
                partial: PartialAnswers::default()
            }
            .label(),
            "budget_exceeded"
        );
        assert_eq!(
            RunStatus::Failed {
                step: StepId::Search,
                cause: "x".into()
            }
            .label(),
            "failed"
        );
    }

    #[test]
    fn test_outcome_path_follows_trace() {
        let outcome = WorkflowOutcome {
            run_id: RunId::from_string("r"),
            status: RunStatus::NoReview,
            state: WorkflowState::new("q", None),
            next_step: StepId::Router,
            steps_executed: 2,
            trace: vec![
                TraceEntry {
                    step: StepId::DirectAnswer,
                    elapsed_ms: 3,
                },
                TraceEntry {
                    step: StepId::Reviewer,
                    elapsed_ms: 5,
                },
            ],
        };
        assert_eq!(outcome.path(), vec![StepId::DirectAnswer, StepId::Reviewer]);
        assert!(outcome.answer().is_none());
    }
}
