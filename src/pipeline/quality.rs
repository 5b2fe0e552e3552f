//! Output sanity rules.
//!
//! Minimal checks on generated content: non-empty, not itself an error
//! marker, and size-bounded. A violation is a data-quality failure on the
//! job result, never fatal to the run.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Why generated content was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityIssue {
    #[error("generated content is empty")]
    Empty,

    #[error("generated content looks like an error marker: {0}")]
    ErrorMarker(String),

    #[error("generated content is {size} bytes, over the {limit} byte bound")]
    Oversized { size: usize, limit: usize },
}

/// The sanity rules applied to every generated artifact.
#[derive(Debug, Clone, Copy)]
pub struct QualityRules {
    /// Upper bound on artifact size in bytes.
    pub max_output_bytes: usize,
}

impl QualityRules {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Check content against the rules.
    pub fn check(&self, content: &str) -> Result<(), QualityIssue> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(QualityIssue::Empty);
        }
        if content.len() > self.max_output_bytes {
            return Err(QualityIssue::Oversized {
                size: content.len(),
                limit: self.max_output_bytes,
            });
        }
        if let Some(marker) = error_marker(trimmed) {
            return Err(QualityIssue::ErrorMarker(marker));
        }
        Ok(())
    }
}

impl Default for QualityRules {
    fn default() -> Self {
        Self::new(256 * 1024)
    }
}

/// Detect output that is an error message rather than documentation.
fn error_marker(content: &str) -> Option<String> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let regex = MARKER.get_or_init(|| {
        Regex::new(
            r"(?i)^(error[:\s]|api error|request failed|rate limit|internal server error|\{\s*\x22error\x22)",
        )
        .expect("marker regex")
    });
    regex.find(content).map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_content_passes() {
        let rules = QualityRules::default();
        assert!(rules.check("# lib.rs\n\nThis module does things.\n").is_ok());
    }

    #[test]
    fn test_empty_content_fails() {
        let rules = QualityRules::default();
        assert_eq!(rules.check("   \n  "), Err(QualityIssue::Empty));
    }

    #[test]
    fn test_error_marker_fails() {
        let rules = QualityRules::default();
        assert!(matches!(
            rules.check("Error: rate limit exceeded"),
            Err(QualityIssue::ErrorMarker(_))
        ));
        assert!(matches!(
            rules.check("{\"error\": {\"type\": \"overloaded\"}}"),
            Err(QualityIssue::ErrorMarker(_))
        ));
    }

    #[test]
    fn test_error_word_mid_document_is_fine() {
        let rules = QualityRules::default();
        assert!(rules
            .check("# Errors\n\nThis module defines error types.")
            .is_ok());
    }

    #[test]
    fn test_oversized_content_fails() {
        let rules = QualityRules::new(64);
        let big = "x".repeat(65);
        assert!(matches!(
            rules.check(&big),
            Err(QualityIssue::Oversized { size: 65, limit: 64 })
        ));
    }
}
