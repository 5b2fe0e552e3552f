//! Trigger classes and per-path decision resolution.

use serde::{Deserialize, Serialize};

use crate::budget::{pattern_matches, BudgetGovernor};
use crate::config::TriggersConfig;

/// Event class governing whether and under what cost rule processing runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    /// Only explicit user invocation regenerates.
    Manual,
    /// Regenerate when a file is saved.
    OnSave,
    /// Regenerate when a commit is created.
    OnCommit,
    /// Regenerate when commits are pushed.
    OnPush,
    /// Never regenerate.
    Disabled,
}

impl TriggerType {
    /// Stable label for logs and ledger metadata.
    pub fn as_label(&self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::OnSave => "on-save",
            TriggerType::OnCommit => "on-commit",
            TriggerType::OnPush => "on-push",
            TriggerType::Disabled => "disabled",
        }
    }

    /// Whether this class never processes.
    pub fn is_disabled(&self) -> bool {
        matches!(self, TriggerType::Disabled)
    }
}

/// Per-path trigger rule. First match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    /// Glob pattern (`*` one segment, `**` any number of segments).
    pub pattern: String,
    /// Trigger class for matching paths.
    pub trigger: TriggerType,
    /// Optional cost ceiling for matching paths, in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
}

/// Resolved decision for one path: how it triggers and what it may cost.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDecision {
    /// Trigger class that applies.
    pub trigger_type: TriggerType,
    /// Cost ceiling in USD, already clamped to the hard safety cap.
    pub cost_ceiling: f64,
}

/// Resolve the decision for a path: first matching rule, else the default.
///
/// The cost ceiling comes from the governor so rule ceilings and clamping
/// stay in one place.
pub fn resolve_decision(
    triggers: &TriggersConfig,
    governor: &BudgetGovernor,
    path: &str,
) -> TriggerDecision {
    let trigger_type = triggers
        .rules
        .iter()
        .find(|rule| pattern_matches(&rule.pattern, path))
        .map(|rule| rule.trigger)
        .unwrap_or(triggers.default);
    TriggerDecision {
        trigger_type,
        cost_ceiling: governor.effective_max_cost(Some(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetState, CostRule};

    fn triggers_with_rules(rules: Vec<TriggerRule>) -> TriggersConfig {
        TriggersConfig {
            default: TriggerType::OnSave,
            rules,
        }
    }

    #[test]
    fn test_first_match_wins() {
        let triggers = triggers_with_rules(vec![
            TriggerRule {
                pattern: "vendor/**".to_string(),
                trigger: TriggerType::Disabled,
                max_cost: None,
            },
            TriggerRule {
                pattern: "**/*.rs".to_string(),
                trigger: TriggerType::OnCommit,
                max_cost: None,
            },
        ]);
        let governor = BudgetGovernor::default();

        let vendored = resolve_decision(&triggers, &governor, "vendor/lib/x.rs");
        assert_eq!(vendored.trigger_type, TriggerType::Disabled);

        let source = resolve_decision(&triggers, &governor, "src/lib.rs");
        assert_eq!(source.trigger_type, TriggerType::OnCommit);
    }

    #[test]
    fn test_unmatched_path_uses_default() {
        let triggers = triggers_with_rules(vec![]);
        let governor = BudgetGovernor::default();
        let decision = resolve_decision(&triggers, &governor, "README.md");
        assert_eq!(decision.trigger_type, TriggerType::OnSave);
    }

    #[test]
    fn test_ceiling_comes_from_matching_cost_rule() {
        let triggers = triggers_with_rules(vec![]);
        let governor = BudgetGovernor::new(
            BudgetState::default(),
            vec![CostRule {
                pattern: "docs/**".to_string(),
                max_cost: 2.0,
            }],
        );
        let decision = resolve_decision(&triggers, &governor, "docs/guide.md");
        assert!((decision.cost_ceiling - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_trigger_type_serde_labels() {
        let json = serde_json::to_string(&TriggerType::OnSave).expect("serialize");
        assert_eq!(json, "\"on-save\"");
        let back: TriggerType = serde_json::from_str("\"on-commit\"").expect("deserialize");
        assert_eq!(back, TriggerType::OnCommit);
    }
}
