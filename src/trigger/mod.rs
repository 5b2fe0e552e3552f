//! Trigger handling.
//!
//! Per-path trigger decisions (which event classes regenerate what, under
//! which cost rule) and the top-level orchestrator state machine that
//! turns external events into budget-gated pipeline dispatches.

pub mod decision;
pub mod orchestrator;

pub use decision::{resolve_decision, TriggerDecision, TriggerRule, TriggerType};
pub use orchestrator::{
    fires_on, DispatchReport, EscalationCounter, OrchestratorState, TriggerOrchestrator,
};
