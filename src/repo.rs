//! Repository collaborators: changed-file discovery and ignore matching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use thiserror::Error;
use tokio::process::Command;

use crate::budget::pattern_matches;

/// Timeout applied to individual git commands so a hung remote or a huge
/// repository cannot stall the engine.
const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from repository operations.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git failed: {0}")]
    Git(String),

    #[error("git timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// List files changed in the working tree.
///
/// `staged_only` limits to the index; `base_branch` diffs against the
/// merge base with that branch instead of the working tree.
pub async fn changed_files(
    root: &Path,
    staged_only: bool,
    base_branch: Option<&str>,
) -> RepoResult<Vec<PathBuf>> {
    let mut args: Vec<String> = vec!["diff".to_string(), "--name-only".to_string()];
    if staged_only {
        args.push("--cached".to_string());
    }
    if let Some(branch) = base_branch {
        args.push(format!("{branch}...HEAD"));
    }

    let output = tokio::time::timeout(
        GIT_TIMEOUT,
        Command::new("git").args(&args).current_dir(root).output(),
    )
    .await
    .map_err(|_| RepoError::Timeout(GIT_TIMEOUT))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(RepoError::Git(stderr));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Decides which paths the engine must never process.
///
/// Combines the repository's gitignore with extra configured patterns.
/// Matching happens on root-relative forward-slash paths.
pub struct IgnoreMatcher {
    root: PathBuf,
    gitignore: Gitignore,
    extra_patterns: Vec<String>,
}

impl IgnoreMatcher {
    /// Matcher for a project root plus configured extra patterns.
    pub fn new(root: impl Into<PathBuf>, extra_patterns: &[String]) -> Self {
        let root = root.into();
        let mut builder = GitignoreBuilder::new(&root);
        // A missing .gitignore is fine; a malformed one degrades to fewer
        // ignore rules rather than an error.
        let _ = builder.add(root.join(".gitignore"));
        let gitignore = builder.build().unwrap_or_else(|_| Gitignore::empty());
        Self {
            root,
            gitignore,
            extra_patterns: extra_patterns.to_vec(),
        }
    }

    /// Whether a path is excluded from processing.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if self
            .gitignore
            .matched_path_or_any_parents(relative, false)
            .is_ignore()
        {
            return true;
        }
        let as_text = relative.to_string_lossy().replace('\\', "/");
        self.extra_patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, &as_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_gitignore_rules_apply() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join(".gitignore"), "target/\n*.log\n").expect("write");

        let matcher = IgnoreMatcher::new(temp.path(), &[]);
        assert!(matcher.is_ignored(&temp.path().join("target/debug/app")));
        assert!(matcher.is_ignored(&temp.path().join("build.log")));
        assert!(!matcher.is_ignored(&temp.path().join("src/lib.rs")));
    }

    #[test]
    fn test_extra_patterns_apply() {
        let temp = TempDir::new().expect("temp dir");
        let matcher = IgnoreMatcher::new(temp.path(), &["generated/**".to_string()]);
        assert!(matcher.is_ignored(&temp.path().join("generated/api/x.rs")));
        assert!(!matcher.is_ignored(&temp.path().join("src/x.rs")));
    }

    #[test]
    fn test_missing_gitignore_is_fine() {
        let temp = TempDir::new().expect("temp dir");
        let matcher = IgnoreMatcher::new(temp.path(), &[]);
        assert!(!matcher.is_ignored(&temp.path().join("src/lib.rs")));
    }

    #[tokio::test]
    async fn test_changed_files_outside_a_repo_errors() {
        let temp = TempDir::new().expect("temp dir");
        let result = changed_files(temp.path(), false, None).await;
        assert!(result.is_err());
    }
}
