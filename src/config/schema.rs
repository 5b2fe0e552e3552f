//! Typed configuration schema and per-section merge.
//!
//! The resolved [`QuillConfig`] is built by layering partial overlay
//! documents over built-in defaults: an override replaces scalars and
//! merges nested mappings field by field, so sibling keys a layer does not
//! mention are never dropped.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::budget::{
    BudgetGovernor, BudgetState, CostEstimator, CostRule, ModelCost, DEFAULT_HOURLY_BUDGET,
    DEFAULT_MAX_COST_PER_EVENT, HARD_SAFETY_CAP, MAX_AUTO_ESCALATIONS,
};
use crate::trigger::{TriggerRule, TriggerType};

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    pub triggers: TriggersConfig,
    pub limits: LimitsConfig,
    pub models: ModelsConfig,
    pub notifications: NotificationsConfig,
    pub drafts: DraftsConfig,
    pub doc_generation: DocGenerationConfig,
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            triggers: TriggersConfig::default(),
            limits: LimitsConfig::default(),
            models: ModelsConfig::default(),
            notifications: NotificationsConfig::default(),
            drafts: DraftsConfig::default(),
            doc_generation: DocGenerationConfig::default(),
        }
    }
}

impl QuillConfig {
    /// Budget state derived from the limits section, clamped to the hard
    /// ceilings.
    pub fn budget_state(&self) -> BudgetState {
        BudgetState::resolve(self.limits.max_cost_per_event, self.limits.hourly_budget)
    }

    /// Per-path cost rules derived from trigger rules that carry a ceiling.
    pub fn cost_rules(&self) -> Vec<CostRule> {
        self.triggers
            .rules
            .iter()
            .filter_map(|rule| {
                rule.max_cost.map(|max_cost| CostRule {
                    pattern: rule.pattern.clone(),
                    max_cost,
                })
            })
            .collect()
    }

    /// Build the budget governor for this configuration.
    pub fn governor(&self) -> BudgetGovernor {
        BudgetGovernor::new(self.budget_state(), self.cost_rules())
    }

    /// Build the cost estimator over this configuration's pricing table.
    pub fn estimator(&self) -> CostEstimator {
        CostEstimator::new(self.models.pricing.clone())
    }
}

/// `[triggers]` — default trigger class plus per-path rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggersConfig {
    /// Trigger class for paths no rule matches.
    pub default: TriggerType,
    /// First-match-wins path rules.
    pub rules: Vec<TriggerRule>,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            default: TriggerType::OnSave,
            rules: Vec::new(),
        }
    }
}

/// `[limits]` — spending caps and ledger location.
///
/// `hard_safety_cap` and `max_auto_escalations` are read-only echoes of the
/// built-in constants; the loader overwrites whatever a layer put there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-event cap in USD, clamped to the hard safety cap at resolution.
    pub max_cost_per_event: f64,
    /// Hourly budget in USD, clamped to its hard ceiling at resolution.
    pub hourly_budget: f64,
    /// Ledger directory override; defaults to the per-user data directory.
    pub ledger_dir: Option<PathBuf>,
    /// Informational echo of the immutable per-event ceiling.
    pub hard_safety_cap: f64,
    /// Informational echo of the immutable escalation ceiling.
    pub max_auto_escalations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_cost_per_event: DEFAULT_MAX_COST_PER_EVENT,
            hourly_budget: DEFAULT_HOURLY_BUDGET,
            ledger_dir: None,
            hard_safety_cap: HARD_SAFETY_CAP,
            max_auto_escalations: MAX_AUTO_ESCALATIONS,
        }
    }
}

/// `[models]` — model selection and pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Model used for generation.
    pub default: String,
    /// Max output tokens per call.
    pub max_tokens: u32,
    /// USD-per-1K-token prices by model name.
    pub pricing: BTreeMap<String, ModelCost>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let mut pricing = BTreeMap::new();
        pricing.insert(
            "claude-sonnet-4".to_string(),
            ModelCost {
                input_cost_per_1k: 0.003,
                output_cost_per_1k: 0.015,
            },
        );
        pricing.insert(
            "claude-haiku-3".to_string(),
            ModelCost {
                input_cost_per_1k: 0.00025,
                output_cost_per_1k: 0.00125,
            },
        );
        Self {
            default: "claude-sonnet-4".to_string(),
            max_tokens: 2048,
            pricing,
        }
    }
}

/// `[notifications]` — what the engine tells the user about out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub enabled: bool,
    /// Surface budget refusals even when notifications are otherwise off.
    pub on_budget_refusal: bool,
    pub on_run_complete: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_budget_refusal: true,
            on_run_complete: false,
        }
    }
}

/// `[drafts]` — staging area for generated docs pending review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftsConfig {
    pub enabled: bool,
    /// Directory drafts land in, relative to the project root.
    pub dir: String,
}

impl Default for DraftsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: "docs/_drafts".to_string(),
        }
    }
}

/// `[doc_generation]` — pipeline behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocGenerationConfig {
    /// Source extensions considered generation candidates.
    pub include_extensions: Vec<String>,
    /// Extra ignore patterns on top of gitignore.
    pub ignore: Vec<String>,
    /// Output directory, relative to the project root.
    pub output_dir: String,
    /// Use the deterministic fallback template when the LLM path fails.
    pub fallback_enabled: bool,
    /// Process-wide concurrent LLM call bound, clamped to [1, 100].
    pub max_concurrent_llm_calls: usize,
    /// Concurrent sub-unit (per-symbol) bound within one target.
    pub per_target_concurrency: usize,
    /// Generated output larger than this is a quality failure.
    pub max_output_bytes: usize,
}

impl Default for DocGenerationConfig {
    fn default() -> Self {
        Self {
            include_extensions: ["rs", "py", "ts", "js", "go", "java"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore: Vec::new(),
            output_dir: "docs/api".to_string(),
            fallback_enabled: true,
            max_concurrent_llm_calls: 5,
            per_target_concurrency: 3,
            max_output_bytes: 256 * 1024,
        }
    }
}

/// Partial configuration document as read from one layer.
///
/// Every field is optional; applying an overlay touches only the keys the
/// layer actually set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuillConfigOverlay {
    pub triggers: Option<TriggersOverlay>,
    pub limits: Option<LimitsOverlay>,
    pub models: Option<ModelsOverlay>,
    pub notifications: Option<NotificationsOverlay>,
    pub drafts: Option<DraftsOverlay>,
    pub doc_generation: Option<DocGenerationOverlay>,
}

impl QuillConfigOverlay {
    /// Merge this overlay into a resolved configuration.
    pub fn apply(self, config: &mut QuillConfig) {
        if let Some(overlay) = self.triggers {
            overlay.apply(&mut config.triggers);
        }
        if let Some(overlay) = self.limits {
            overlay.apply(&mut config.limits);
        }
        if let Some(overlay) = self.models {
            overlay.apply(&mut config.models);
        }
        if let Some(overlay) = self.notifications {
            overlay.apply(&mut config.notifications);
        }
        if let Some(overlay) = self.drafts {
            overlay.apply(&mut config.drafts);
        }
        if let Some(overlay) = self.doc_generation {
            overlay.apply(&mut config.doc_generation);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TriggersOverlay {
    pub default: Option<TriggerType>,
    pub rules: Option<Vec<TriggerRule>>,
}

impl TriggersOverlay {
    fn apply(self, section: &mut TriggersConfig) {
        if let Some(default) = self.default {
            section.default = default;
        }
        if let Some(rules) = self.rules {
            section.rules = rules;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LimitsOverlay {
    pub max_cost_per_event: Option<f64>,
    pub hourly_budget: Option<f64>,
    pub ledger_dir: Option<PathBuf>,
}

impl LimitsOverlay {
    fn apply(self, section: &mut LimitsConfig) {
        if let Some(value) = self.max_cost_per_event {
            section.max_cost_per_event = value;
        }
        if let Some(value) = self.hourly_budget {
            section.hourly_budget = value;
        }
        if let Some(value) = self.ledger_dir {
            section.ledger_dir = Some(value);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelsOverlay {
    pub default: Option<String>,
    pub max_tokens: Option<u32>,
    pub pricing: Option<BTreeMap<String, ModelCost>>,
}

impl ModelsOverlay {
    fn apply(self, section: &mut ModelsConfig) {
        if let Some(value) = self.default {
            section.default = value;
        }
        if let Some(value) = self.max_tokens {
            section.max_tokens = value;
        }
        if let Some(pricing) = self.pricing {
            // Nested mapping: merge keys, keep siblings.
            section.pricing.extend(pricing);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationsOverlay {
    pub enabled: Option<bool>,
    pub on_budget_refusal: Option<bool>,
    pub on_run_complete: Option<bool>,
}

impl NotificationsOverlay {
    fn apply(self, section: &mut NotificationsConfig) {
        if let Some(value) = self.enabled {
            section.enabled = value;
        }
        if let Some(value) = self.on_budget_refusal {
            section.on_budget_refusal = value;
        }
        if let Some(value) = self.on_run_complete {
            section.on_run_complete = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DraftsOverlay {
    pub enabled: Option<bool>,
    pub dir: Option<String>,
}

impl DraftsOverlay {
    fn apply(self, section: &mut DraftsConfig) {
        if let Some(value) = self.enabled {
            section.enabled = value;
        }
        if let Some(value) = self.dir {
            section.dir = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DocGenerationOverlay {
    pub include_extensions: Option<Vec<String>>,
    pub ignore: Option<Vec<String>>,
    pub output_dir: Option<String>,
    pub fallback_enabled: Option<bool>,
    pub max_concurrent_llm_calls: Option<usize>,
    pub per_target_concurrency: Option<usize>,
    pub max_output_bytes: Option<usize>,
}

impl DocGenerationOverlay {
    fn apply(self, section: &mut DocGenerationConfig) {
        if let Some(value) = self.include_extensions {
            section.include_extensions = value;
        }
        if let Some(value) = self.ignore {
            section.ignore = value;
        }
        if let Some(value) = self.output_dir {
            section.output_dir = value;
        }
        if let Some(value) = self.fallback_enabled {
            section.fallback_enabled = value;
        }
        if let Some(value) = self.max_concurrent_llm_calls {
            section.max_concurrent_llm_calls = value;
        }
        if let Some(value) = self.per_target_concurrency {
            section.per_target_concurrency = value;
        }
        if let Some(value) = self.max_output_bytes {
            section.max_output_bytes = value;
        }
    }
}
