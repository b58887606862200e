//! Escalation engine orchestration.
//!
//! Wires the matcher, the firing guard, the action scheduler and the
//! notification dispatcher into an evaluation pipeline, and runs the
//! background tasks around it: the overdue scanner, the deferred-action
//! runner, and the evaluation service loop.

pub mod deferred;
pub mod manual;
pub mod pipeline;
pub mod scanner;
pub mod scheduler;
pub mod service;

pub use deferred::DeferredRunner;
pub use manual::ManualEscalationHandler;
pub use pipeline::{EscalationEngine, EvaluationOutcome};
pub use scanner::{OverdueScanner, ScanPhase, ScanSummary};
pub use scheduler::{plan, Execution, PlannedAction};
pub use service::{EngineHandle, EscalationService, EvaluationRequest, RunningService};
