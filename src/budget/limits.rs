//! Hard spending ceilings and the derived budget state.
//!
//! The hard constants here are the last line of defense: no configuration
//! layer, environment override, or CLI flag may raise a cap above them.

use serde::{Deserialize, Serialize};

/// Immutable per-event spending ceiling in USD.
pub const HARD_SAFETY_CAP: f64 = 10.0;

/// Immutable hourly spending ceiling in USD.
pub const HARD_HOURLY_BUDGET: f64 = 25.0;

/// Immutable ceiling on cascade re-dispatches per originating event.
pub const MAX_AUTO_ESCALATIONS: u32 = 3;

/// Built-in default per-event cap in USD.
pub const DEFAULT_MAX_COST_PER_EVENT: f64 = 0.50;

/// Built-in default hourly budget in USD.
pub const DEFAULT_HOURLY_BUDGET: f64 = 5.0;

/// Resolved budget state: user-configurable caps clamped under the hard
/// constants, plus the non-overridable ceilings echoed for visibility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    /// Per-event cap, clamped to [`HARD_SAFETY_CAP`].
    pub max_cost_per_event: f64,
    /// Hourly budget, clamped to [`HARD_HOURLY_BUDGET`].
    pub hourly_budget: f64,
    /// Echo of [`HARD_SAFETY_CAP`]; informational, never overridable.
    pub hard_safety_cap: f64,
    /// Echo of [`MAX_AUTO_ESCALATIONS`]; informational, never overridable.
    pub max_auto_escalations: u32,
}

impl BudgetState {
    /// Derive the state from configured caps, clamping to the hard constants.
    pub fn resolve(max_cost_per_event: f64, hourly_budget: f64) -> Self {
        Self {
            max_cost_per_event: max_cost_per_event.min(HARD_SAFETY_CAP).max(0.0),
            hourly_budget: hourly_budget.min(HARD_HOURLY_BUDGET).max(0.0),
            hard_safety_cap: HARD_SAFETY_CAP,
            max_auto_escalations: MAX_AUTO_ESCALATIONS,
        }
    }
}

impl Default for BudgetState {
    fn default() -> Self {
        Self::resolve(DEFAULT_MAX_COST_PER_EVENT, DEFAULT_HOURLY_BUDGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_clamps_to_hard_ceilings() {
        let state = BudgetState::resolve(999.0, 999.0);
        assert_eq!(state.max_cost_per_event, HARD_SAFETY_CAP);
        assert_eq!(state.hourly_budget, HARD_HOURLY_BUDGET);
    }

    #[test]
    fn test_resolve_keeps_values_under_ceiling() {
        let state = BudgetState::resolve(0.25, 2.0);
        assert_eq!(state.max_cost_per_event, 0.25);
        assert_eq!(state.hourly_budget, 2.0);
    }

    #[test]
    fn test_negative_caps_floor_at_zero() {
        let state = BudgetState::resolve(-1.0, -1.0);
        assert_eq!(state.max_cost_per_event, 0.0);
        assert_eq!(state.hourly_budget, 0.0);
    }

    #[test]
    fn test_echo_fields_are_the_constants() {
        let state = BudgetState::resolve(0.1, 0.1);
        assert_eq!(state.hard_safety_cap, HARD_SAFETY_CAP);
        assert_eq!(state.max_auto_escalations, MAX_AUTO_ESCALATIONS);
    }
}
