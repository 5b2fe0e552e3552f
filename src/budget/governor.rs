//! Budget governor: the pre-flight gate every unit of work passes through.

use glob::{MatchOptions, Pattern};

use crate::budget::limits::{BudgetState, HARD_SAFETY_CAP};

/// Match a path-pattern rule against a path.
///
/// `*` matches within one path segment; `**` spans any number of segments.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    match Pattern::new(pattern) {
        Ok(compiled) => compiled.matches_with(path, options),
        Err(err) => {
            tracing::warn!(pattern, error = %err, "invalid path pattern ignored");
            false
        }
    }
}

/// A per-path cost ceiling rule. First match wins.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRule {
    /// Glob pattern the rule applies to.
    pub pattern: String,
    /// Cost ceiling for matching paths, in USD.
    pub max_cost: f64,
}

/// Outcome of a budget pre-flight check.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDecision {
    /// Whether the candidate work may proceed.
    pub allowed: bool,
    /// Human-readable refusal reason when not allowed.
    pub reason: Option<String>,
    /// The per-event cap that applied.
    pub effective_cap: f64,
    /// Hourly budget remaining before this work, in USD.
    pub hourly_remaining: f64,
}

/// Decides whether candidate work fits under the per-event and hourly caps.
///
/// Reads hourly spend from the caller (ledger-derived) rather than holding
/// a ledger reference; the governor owns cap derivation only.
#[derive(Debug, Clone)]
pub struct BudgetGovernor {
    state: BudgetState,
    rules: Vec<CostRule>,
}

impl BudgetGovernor {
    /// Governor over a resolved budget state and per-path rules.
    pub fn new(state: BudgetState, rules: Vec<CostRule>) -> Self {
        Self { state, rules }
    }

    /// The resolved budget state this governor enforces.
    pub fn state(&self) -> &BudgetState {
        &self.state
    }

    /// Effective per-event cap for a path.
    ///
    /// First matching rule wins, else the configured per-event cap; the
    /// result is always clamped to the hard safety cap regardless of what
    /// any layer attempted to configure.
    pub fn effective_max_cost(&self, path: Option<&str>) -> f64 {
        let configured = path
            .and_then(|p| {
                self.rules
                    .iter()
                    .find(|rule| pattern_matches(&rule.pattern, p))
                    .map(|rule| rule.max_cost)
            })
            .unwrap_or(self.state.max_cost_per_event);
        configured.min(HARD_SAFETY_CAP)
    }

    /// Full pre-flight check with an actionable refusal reason.
    ///
    /// Work at exactly a cap is allowed; one cent past it is refused.
    pub fn check(&self, estimated_cost: f64, path: Option<&str>, hourly_spend: f64) -> BudgetDecision {
        let effective_cap = self.effective_max_cost(path);
        let hourly_remaining = (self.state.hourly_budget - hourly_spend).max(0.0);

        if estimated_cost > effective_cap {
            return BudgetDecision {
                allowed: false,
                reason: Some(format!(
                    "estimated cost ${:.4} exceeds the per-event cap ${:.4}{}; raise limits.max_cost_per_event or add a path rule (hard ceiling ${:.2})",
                    estimated_cost,
                    effective_cap,
                    path.map(|p| format!(" for {p}")).unwrap_or_default(),
                    HARD_SAFETY_CAP,
                )),
                effective_cap,
                hourly_remaining,
            };
        }

        if hourly_spend + estimated_cost > self.state.hourly_budget {
            return BudgetDecision {
                allowed: false,
                reason: Some(format!(
                    "estimated cost ${:.4} on top of ${:.4} spent this hour exceeds the hourly budget ${:.4}; wait for the window to roll or raise limits.hourly_budget",
                    estimated_cost, hourly_spend, self.state.hourly_budget,
                )),
                effective_cap,
                hourly_remaining,
            };
        }

        BudgetDecision {
            allowed: true,
            reason: None,
            effective_cap,
            hourly_remaining,
        }
    }

    /// Boolean form of [`check`](Self::check).
    pub fn should_process(
        &self,
        estimated_cost: f64,
        path: Option<&str>,
        hourly_spend: f64,
    ) -> bool {
        self.check(estimated_cost, path, hourly_spend).allowed
    }
}

impl Default for BudgetGovernor {
    fn default() -> Self {
        Self::new(BudgetState::default(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::limits::HARD_HOURLY_BUDGET;

    fn governor_with_caps(per_event: f64, hourly: f64) -> BudgetGovernor {
        BudgetGovernor::new(BudgetState::resolve(per_event, hourly), Vec::new())
    }

    #[test]
    fn test_effective_cap_never_exceeds_hard_ceiling() {
        // Attempted overrides far past the ceiling, at every layer we model.
        let governor = BudgetGovernor::new(
            BudgetState::resolve(500.0, 500.0),
            vec![CostRule {
                pattern: "src/**".to_string(),
                max_cost: 500.0,
            }],
        );
        assert!(governor.effective_max_cost(None) <= HARD_SAFETY_CAP);
        assert!(governor.effective_max_cost(Some("src/lib.rs")) <= HARD_SAFETY_CAP);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let governor = BudgetGovernor::new(
            BudgetState::default(),
            vec![
                CostRule {
                    pattern: "src/generated/**".to_string(),
                    max_cost: 0.01,
                },
                CostRule {
                    pattern: "src/**".to_string(),
                    max_cost: 1.0,
                },
            ],
        );
        assert!((governor.effective_max_cost(Some("src/generated/api.rs")) - 0.01).abs() < 1e-9);
        assert!((governor.effective_max_cost(Some("src/lib.rs")) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unmatched_path_falls_back_to_general_cap() {
        let governor = BudgetGovernor::new(
            BudgetState::resolve(0.30, 5.0),
            vec![CostRule {
                pattern: "docs/**".to_string(),
                max_cost: 2.0,
            }],
        );
        assert!((governor.effective_max_cost(Some("src/lib.rs")) - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_glob_segment_semantics() {
        assert!(pattern_matches("tests/**/*.py", "tests/unit/deep/x.py"));
        assert!(!pattern_matches("tests/**/*.py", "src/tests_helper.py"));
        // `*` stays within one segment.
        assert!(pattern_matches("src/*.rs", "src/lib.rs"));
        assert!(!pattern_matches("src/*.rs", "src/nested/lib.rs"));
    }

    #[test]
    fn test_hourly_budget_refusal() {
        // hourly_budget=1.0, hard cap=10.0, spent 0.95, estimate 0.10.
        let governor = governor_with_caps(10.0, 1.0);
        assert!(!governor.should_process(0.10, None, 0.95));
        let decision = governor.check(0.10, None, 0.95);
        assert!(decision.reason.is_some());
    }

    #[test]
    fn test_boundary_at_the_ceiling() {
        let governor = governor_with_caps(HARD_SAFETY_CAP, HARD_HOURLY_BUDGET);
        assert!(governor.should_process(HARD_SAFETY_CAP, None, 0.0));
        assert!(!governor.should_process(HARD_SAFETY_CAP + 0.01, None, 0.0));
    }

    #[test]
    fn test_exactly_exhausting_the_hourly_budget_is_allowed() {
        let governor = governor_with_caps(5.0, 5.0);
        assert!(governor.should_process(2.5, None, 2.5));
        assert!(!governor.should_process(2.51, None, 2.5));
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        assert!(!pattern_matches("src/[", "src/lib.rs"));
    }
}
