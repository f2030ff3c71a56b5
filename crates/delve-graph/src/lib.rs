//! The research workflow: a fixed step graph over a shared, append-only
//! state, driven by a budgeted engine.

pub mod edge;
pub mod engine;
pub mod prompts;
pub mod router;
pub mod run_log;
pub mod schema;
pub mod state;
pub mod step;
pub mod steps;

pub use edge::{Edge, EdgeCondition, Topology};
pub use engine::{RunStatus, TraceEntry, WorkflowEngine, WorkflowOutcome};
pub use router::decide;
pub use run_log::RunLogger;
pub use schema::{PdfAnswer, Plan, ReviewVerdict, RouteDecision, RouteTarget, Selection};
pub use state::{PartialAnswers, StepOutput, WorkflowState};
pub use step::{Slot, StepId};
pub use steps::Collaborators;
