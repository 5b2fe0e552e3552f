//! Conservative cost estimation.
//!
//! Estimates are deliberately high: the governor compares them against the
//! caps before any money is spent, and an over-estimate that refuses a
//! borderline job is cheaper than a surprise on the ledger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-model price in USD per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    /// USD per 1K input tokens.
    pub input_cost_per_1k: f64,
    /// USD per 1K output tokens.
    pub output_cost_per_1k: f64,
}

impl ModelCost {
    /// Price for given token counts.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let output_cost = (output_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        input_cost + output_cost
    }
}

impl Default for ModelCost {
    fn default() -> Self {
        // Mid-tier model pricing as the default assumption.
        Self {
            input_cost_per_1k: 0.003,
            output_cost_per_1k: 0.015,
        }
    }
}

/// Conservative token-and-cost estimator.
///
/// Token counts come from character and word heuristics; the higher of the
/// two is taken and multiplied by a safety margin. Unknown models price at
/// the default tier.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    pricing: BTreeMap<String, ModelCost>,
    safety_margin: f64,
    /// Assumed output size as a fraction of estimated input tokens.
    output_ratio: f64,
}

impl CostEstimator {
    /// Estimator over a pricing table.
    pub fn new(pricing: BTreeMap<String, ModelCost>) -> Self {
        Self {
            pricing,
            safety_margin: 1.5,
            output_ratio: 0.5,
        }
    }

    /// Override the safety margin (floored at 1.0 so estimates never shrink).
    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin.max(1.0);
        self
    }

    /// Price for a model, falling back to the default tier.
    pub fn model_cost(&self, model: &str) -> ModelCost {
        self.pricing.get(model).copied().unwrap_or_default()
    }

    /// Estimate tokens for a piece of text, erring high.
    pub fn estimate_tokens(&self, text: &str) -> u64 {
        let by_chars = (text.chars().count() as f64 / 3.5).ceil() as u64;
        let by_words = (text.split_whitespace().count() as f64 * 1.3).ceil() as u64;
        let base = by_chars.max(by_words);
        (base as f64 * self.safety_margin).ceil() as u64
    }

    /// Estimate the USD cost of generating documentation for `content`.
    pub fn estimate_generation(&self, model: &str, content: &str) -> f64 {
        // Prompt scaffolding around the content itself.
        let input_tokens = self.estimate_tokens(content) + 600;
        let output_tokens = (input_tokens as f64 * self.output_ratio).ceil() as u64;
        self.model_cost(model)
            .calculate_cost(input_tokens, output_tokens)
    }

    /// Estimate generation cost from a byte length alone, for paths whose
    /// content has not been read yet. Assumes one byte per character.
    pub fn estimate_generation_sized(&self, model: &str, content_bytes: u64) -> f64 {
        let base = (content_bytes as f64 / 3.5).ceil();
        let input_tokens = (base * self.safety_margin).ceil() as u64 + 600;
        let output_tokens = (input_tokens as f64 * self.output_ratio).ceil() as u64;
        self.model_cost(model)
            .calculate_cost(input_tokens, output_tokens)
    }
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_is_conservative() {
        let estimator = CostEstimator::default();
        let text = "fn main() { println!(\"hello\"); }";
        let raw = (text.chars().count() as f64 / 3.5).ceil() as u64;
        assert!(estimator.estimate_tokens(text) > raw);
    }

    #[test]
    fn test_empty_text_estimates_zero_tokens() {
        let estimator = CostEstimator::default();
        assert_eq!(estimator.estimate_tokens(""), 0);
    }

    #[test]
    fn test_known_model_pricing_is_used() {
        let mut pricing = BTreeMap::new();
        pricing.insert(
            "cheap".to_string(),
            ModelCost {
                input_cost_per_1k: 0.0001,
                output_cost_per_1k: 0.0005,
            },
        );
        let estimator = CostEstimator::new(pricing);
        let content = "x".repeat(4000);
        let cheap = estimator.estimate_generation("cheap", &content);
        let default = estimator.estimate_generation("unknown-model", &content);
        assert!(cheap < default);
    }

    #[test]
    fn test_sized_estimate_tracks_content_estimate() {
        let estimator = CostEstimator::default();
        let content = "y".repeat(2000);
        let by_content = estimator.estimate_generation("m", &content);
        let by_size = estimator.estimate_generation_sized("m", content.len() as u64);
        // Same heuristic inputs, same order of magnitude.
        assert!((by_content - by_size).abs() < by_content * 0.5);
    }

    #[test]
    fn test_model_cost_calculation() {
        let cost = ModelCost {
            input_cost_per_1k: 0.003,
            output_cost_per_1k: 0.015,
        };
        let total = cost.calculate_cost(1000, 1000);
        assert!((total - 0.018).abs() < 1e-9);
    }
}
