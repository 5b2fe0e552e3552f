//! Reference validation.
//!
//! Generated documentation likes to claim that files and symbols exist.
//! The [`ReferenceValidator`] contract checks such claims against the real
//! repository; outcomes are recorded as `nav_validation` ledger events and
//! feed the accuracy metrics.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// Outcome of checking one claimed reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    /// Whether the claimed reference exists.
    pub is_valid: bool,
    /// Confidence in the verdict, 0.0 to 1.0.
    pub confidence: f64,
    /// A nearby real path when the claim looks like a near miss.
    pub suggestion: Option<String>,
}

/// Checks claimed file/symbol references against a repository.
pub trait ReferenceValidator: Send + Sync {
    /// Validate one claim. `claimed_symbol` further narrows the claim to a
    /// named item inside the file.
    fn validate(
        &self,
        claimed_path: &Path,
        claimed_symbol: Option<&str>,
        repo_root: &Path,
    ) -> ValidationOutcome;
}

/// Filesystem-backed validator: a path claim is valid when the file exists
/// under the root; a symbol claim additionally requires the name to occur
/// in the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReferenceValidator;

impl ReferenceValidator for FsReferenceValidator {
    fn validate(
        &self,
        claimed_path: &Path,
        claimed_symbol: Option<&str>,
        repo_root: &Path,
    ) -> ValidationOutcome {
        let absolute = repo_root.join(claimed_path);
        if !absolute.is_file() {
            return ValidationOutcome {
                is_valid: false,
                confidence: 0.9,
                suggestion: suggest_by_file_name(claimed_path, repo_root),
            };
        }

        let Some(symbol) = claimed_symbol else {
            return ValidationOutcome {
                is_valid: true,
                confidence: 1.0,
                suggestion: None,
            };
        };

        match std::fs::read_to_string(&absolute) {
            Ok(content) if content.contains(symbol) => ValidationOutcome {
                is_valid: true,
                confidence: 0.9,
                suggestion: None,
            },
            Ok(_) => ValidationOutcome {
                is_valid: false,
                confidence: 0.8,
                suggestion: None,
            },
            // Unreadable file: the path exists, which is most of the claim.
            Err(_) => ValidationOutcome {
                is_valid: true,
                confidence: 0.5,
                suggestion: None,
            },
        }
    }
}

/// Look for a file with the same name elsewhere under the root.
fn suggest_by_file_name(claimed_path: &Path, repo_root: &Path) -> Option<String> {
    let wanted = claimed_path.file_name()?;
    for entry in ignore::Walk::new(repo_root).flatten() {
        if entry.file_name() == wanted && entry.path().is_file() {
            let relative = entry
                .path()
                .strip_prefix(repo_root)
                .unwrap_or(entry.path());
            return Some(relative.display().to_string());
        }
    }
    None
}

/// Pull path-looking claims out of generated markdown.
///
/// Matches backtick spans containing a separator and a file extension;
/// capped so pathological output cannot turn validation into a crawl.
pub fn extract_claimed_paths(content: &str, limit: usize) -> Vec<String> {
    static CLAIM: OnceLock<Regex> = OnceLock::new();
    let regex = CLAIM.get_or_init(|| {
        Regex::new(r"`([A-Za-z0-9_\-./]+/[A-Za-z0-9_\-.]+\.[A-Za-z0-9]{1,8})`").expect("claim regex")
    });
    let mut seen = Vec::new();
    for capture in regex.captures_iter(content) {
        let claim = capture[1].to_string();
        if !seen.contains(&claim) {
            seen.push(claim);
        }
        if seen.len() >= limit {
            break;
        }
    }
    seen
}
