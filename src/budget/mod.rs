//! Budget governance.
//!
//! This module keeps spending bounded: hard ceilings no configuration may
//! exceed, a governor that pre-flights every candidate unit of work against
//! the per-event and hourly caps, and a conservative cost estimator shared
//! by the pipeline and the orchestrator.
//!
//! # Example
//!
//! ```ignore
//! use quill::budget::{BudgetGovernor, BudgetState};
//!
//! let governor = BudgetGovernor::new(BudgetState::resolve(0.50, 5.0), vec![]);
//! if governor.should_process(0.12, Some("src/lib.rs"), hourly_spend) {
//!     // Proceed with generation
//! }
//! ```

mod estimator;
mod governor;
mod limits;

pub use estimator::{CostEstimator, ModelCost};
pub use governor::{pattern_matches, BudgetDecision, BudgetGovernor, CostRule};
pub use limits::{
    BudgetState, DEFAULT_HOURLY_BUDGET, DEFAULT_MAX_COST_PER_EVENT, HARD_HOURLY_BUDGET,
    HARD_SAFETY_CAP, MAX_AUTO_ESCALATIONS,
};
