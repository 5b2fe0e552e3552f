//! Environment variable overrides.
//!
//! A fixed table maps variable names onto configuration keys. Values that
//! fail type conversion are logged and skipped, leaving the prior layered
//! value in place.

use std::path::PathBuf;

use tracing::warn;

use crate::config::schema::QuillConfig;
use crate::trigger::TriggerType;

/// Bounds for the process-wide LLM concurrency override.
pub const LLM_CONCURRENCY_MIN: usize = 1;
pub const LLM_CONCURRENCY_MAX: usize = 100;

/// Value type an override must parse as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvValueKind {
    Float,
    Int,
    Bool,
    Text,
    Trigger,
}

/// One entry in the override table.
#[derive(Debug, Clone, Copy)]
pub struct EnvOverride {
    /// Environment variable name.
    pub var: &'static str,
    /// Configuration section the value lands in.
    pub section: &'static str,
    /// Key within the section.
    pub key: &'static str,
    /// Required value type.
    pub kind: EnvValueKind,
}

/// The fixed override table.
pub const ENV_OVERRIDES: &[EnvOverride] = &[
    EnvOverride {
        var: "QUILL_MAX_COST_PER_EVENT",
        section: "limits",
        key: "max_cost_per_event",
        kind: EnvValueKind::Float,
    },
    EnvOverride {
        var: "QUILL_HOURLY_BUDGET",
        section: "limits",
        key: "hourly_budget",
        kind: EnvValueKind::Float,
    },
    EnvOverride {
        var: "QUILL_LEDGER_PATH",
        section: "limits",
        key: "ledger_dir",
        kind: EnvValueKind::Text,
    },
    EnvOverride {
        var: "QUILL_DEFAULT_TRIGGER",
        section: "triggers",
        key: "default",
        kind: EnvValueKind::Trigger,
    },
    EnvOverride {
        var: "QUILL_MODEL",
        section: "models",
        key: "default",
        kind: EnvValueKind::Text,
    },
    EnvOverride {
        var: "QUILL_MAX_CONCURRENT_LLM_CALLS",
        section: "doc_generation",
        key: "max_concurrent_llm_calls",
        kind: EnvValueKind::Int,
    },
    EnvOverride {
        var: "QUILL_FALLBACK_ENABLED",
        section: "doc_generation",
        key: "fallback_enabled",
        kind: EnvValueKind::Bool,
    },
    EnvOverride {
        var: "QUILL_OUTPUT_DIR",
        section: "doc_generation",
        key: "output_dir",
        kind: EnvValueKind::Text,
    },
    EnvOverride {
        var: "QUILL_NOTIFY",
        section: "notifications",
        key: "enabled",
        kind: EnvValueKind::Bool,
    },
];

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut QuillConfig) {
    apply_env_overrides_from(config, |var| std::env::var(var).ok());
}

/// Apply overrides through a lookup function (injectable for tests).
pub fn apply_env_overrides_from(
    config: &mut QuillConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    for entry in ENV_OVERRIDES {
        let Some(raw) = lookup(entry.var) else {
            continue;
        };
        if !assign(config, entry, &raw) {
            warn!(
                var = entry.var,
                value = %raw,
                "environment override failed type conversion, keeping prior value"
            );
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" => Some(true),
        "0" => Some(false),
        other => other.parse().ok(),
    }
}

fn parse_trigger(raw: &str) -> Option<TriggerType> {
    match raw.trim() {
        "manual" => Some(TriggerType::Manual),
        "on-save" => Some(TriggerType::OnSave),
        "on-commit" => Some(TriggerType::OnCommit),
        "on-push" => Some(TriggerType::OnPush),
        "disabled" => Some(TriggerType::Disabled),
        _ => None,
    }
}

fn assign(config: &mut QuillConfig, entry: &EnvOverride, raw: &str) -> bool {
    match (entry.section, entry.key) {
        ("limits", "max_cost_per_event") => match raw.trim().parse::<f64>() {
            Ok(value) => {
                config.limits.max_cost_per_event = value;
                true
            }
            Err(_) => false,
        },
        ("limits", "hourly_budget") => match raw.trim().parse::<f64>() {
            Ok(value) => {
                config.limits.hourly_budget = value;
                true
            }
            Err(_) => false,
        },
        ("limits", "ledger_dir") => {
            config.limits.ledger_dir = Some(PathBuf::from(raw));
            true
        }
        ("triggers", "default") => match parse_trigger(raw) {
            Some(trigger) => {
                config.triggers.default = trigger;
                true
            }
            None => false,
        },
        ("models", "default") => {
            config.models.default = raw.trim().to_string();
            true
        }
        ("doc_generation", "max_concurrent_llm_calls") => match raw.trim().parse::<usize>() {
            Ok(value) => {
                config.doc_generation.max_concurrent_llm_calls =
                    value.clamp(LLM_CONCURRENCY_MIN, LLM_CONCURRENCY_MAX);
                true
            }
            Err(_) => false,
        },
        ("doc_generation", "fallback_enabled") => match parse_bool(raw) {
            Some(value) => {
                config.doc_generation.fallback_enabled = value;
                true
            }
            None => false,
        },
        ("doc_generation", "output_dir") => {
            config.doc_generation.output_dir = raw.trim().to_string();
            true
        }
        ("notifications", "enabled") => match parse_bool(raw) {
            Some(value) => {
                config.notifications.enabled = value;
                true
            }
            None => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(pairs: &[(&str, &str)]) -> QuillConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = QuillConfig::default();
        apply_env_overrides_from(&mut config, |var| map.get(var).cloned());
        config
    }

    #[test]
    fn test_valid_overrides_apply() {
        let config = apply(&[
            ("QUILL_HOURLY_BUDGET", "2.5"),
            ("QUILL_MODEL", "claude-haiku-3"),
            ("QUILL_DEFAULT_TRIGGER", "on-commit"),
            ("QUILL_FALLBACK_ENABLED", "false"),
        ]);
        assert_eq!(config.limits.hourly_budget, 2.5);
        assert_eq!(config.models.default, "claude-haiku-3");
        assert_eq!(config.triggers.default, TriggerType::OnCommit);
        assert!(!config.doc_generation.fallback_enabled);
    }

    #[test]
    fn test_unparsable_value_keeps_prior() {
        let config = apply(&[("QUILL_HOURLY_BUDGET", "lots")]);
        assert_eq!(
            config.limits.hourly_budget,
            QuillConfig::default().limits.hourly_budget
        );
    }

    #[test]
    fn test_concurrency_clamped_to_bounds() {
        let high = apply(&[("QUILL_MAX_CONCURRENT_LLM_CALLS", "5000")]);
        assert_eq!(high.doc_generation.max_concurrent_llm_calls, 100);

        let low = apply(&[("QUILL_MAX_CONCURRENT_LLM_CALLS", "0")]);
        assert_eq!(low.doc_generation.max_concurrent_llm_calls, 1);
    }

    #[test]
    fn test_default_concurrency_without_override() {
        let config = apply(&[]);
        assert_eq!(config.doc_generation.max_concurrent_llm_calls, 5);
    }

    #[test]
    fn test_bool_accepts_numeric_forms() {
        let config = apply(&[("QUILL_NOTIFY", "1")]);
        assert!(config.notifications.enabled);
    }

    #[test]
    fn test_unknown_trigger_label_skipped() {
        let config = apply(&[("QUILL_DEFAULT_TRIGGER", "on-sneeze")]);
        assert_eq!(
            config.triggers.default,
            QuillConfig::default().triggers.default
        );
    }
}
