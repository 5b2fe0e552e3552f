//! Job and result types for the generation pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a job documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// One source file.
    SourceFile,
    /// A directory's package-level summary.
    PackageSummary,
}

/// One unit of work: created by the orchestrator or the pipeline's own
/// enumeration, consumed once, discarded after its result is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Path being documented (file or directory, per `kind`).
    pub target: PathBuf,
    pub kind: TargetKind,
    /// Conservative pre-flight cost estimate in USD.
    pub estimated_cost: f64,
    /// Attempts made so far; informational.
    pub attempt: u32,
}

impl Job {
    /// A first-attempt job.
    pub fn new(target: impl Into<PathBuf>, kind: TargetKind, estimated_cost: f64) -> Self {
        Self {
            target: target.into(),
            kind,
            estimated_cost,
            attempt: 1,
        }
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Path the job documented.
    pub target: PathBuf,
    pub kind: TargetKind,
    /// Whether usable output exists for the target.
    pub success: bool,
    /// Real cost incurred, in USD.
    pub cost_usd: f64,
    /// True only when content was unchanged since the last success.
    pub skipped: bool,
    /// Failure or refusal description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    /// A zero-cost skip for a fresh target.
    pub fn skipped(target: impl Into<PathBuf>, kind: TargetKind) -> Self {
        Self {
            target: target.into(),
            kind,
            success: true,
            cost_usd: 0.0,
            skipped: false,
            error: None,
        }
        .mark_skipped()
    }

    fn mark_skipped(mut self) -> Self {
        self.skipped = true;
        self
    }

    /// A successful generation.
    pub fn generated(target: impl Into<PathBuf>, kind: TargetKind, cost_usd: f64) -> Self {
        Self {
            target: target.into(),
            kind,
            success: true,
            cost_usd,
            skipped: false,
            error: None,
        }
    }

    /// A failure or refusal. `cost_usd` covers anything already spent.
    pub fn failed(
        target: impl Into<PathBuf>,
        kind: TargetKind,
        cost_usd: f64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            kind,
            success: false,
            cost_usd,
            skipped: false,
            error: Some(error.into()),
        }
    }
}

/// Aggregate totals for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    /// Candidates enumerated (after ignore filtering).
    pub candidates: usize,
    /// Jobs that produced fresh output.
    pub generated: usize,
    /// Jobs skipped as already fresh.
    pub skipped: usize,
    /// Jobs refused by the budget governor.
    pub blocked: usize,
    /// Jobs that failed (generation or quality).
    pub failed: usize,
    /// Candidates never launched because the run budget was reached.
    pub unlaunched: usize,
    /// Real cost of the run, in USD.
    pub total_cost_usd: f64,
    /// LLM calls actually made.
    pub llm_calls: u64,
    /// Whether the run budget stopped the launch loop early.
    pub budget_exhausted: bool,
}

impl RunTotals {
    /// Fold one result into the totals. Budget refusals carry a
    /// `budget:`-prefixed error and count as blocked rather than failed.
    pub fn record(&mut self, result: &JobResult) {
        self.total_cost_usd += result.cost_usd;
        if result.skipped {
            self.skipped += 1;
        } else if result.success {
            self.generated += 1;
        } else if result
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("budget:"))
        {
            self.blocked += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Per-target results plus run totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutcome {
    pub results: Vec<JobResult>,
    pub totals: RunTotals,
}

impl RunOutcome {
    /// Targets that produced fresh output this run, by kind.
    pub fn generated_targets(&self, kind: TargetKind) -> Vec<PathBuf> {
        self.results
            .iter()
            .filter(|r| r.kind == kind && r.success && !r.skipped)
            .map(|r| r.target.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_fold() {
        let mut totals = RunTotals::default();
        totals.record(&JobResult::generated("a.rs", TargetKind::SourceFile, 0.02));
        totals.record(&JobResult::skipped("b.rs", TargetKind::SourceFile));
        totals.record(&JobResult::failed(
            "c.rs",
            TargetKind::SourceFile,
            0.01,
            "quality: empty output",
        ));
        totals.record(&JobResult::failed(
            "d.rs",
            TargetKind::SourceFile,
            0.0,
            "budget: per-event cap exceeded",
        ));

        assert_eq!(totals.generated, 1);
        assert_eq!(totals.skipped, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.blocked, 1);
        assert!((totals.total_cost_usd - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_skipped_result_shape() {
        let result = JobResult::skipped("x.rs", TargetKind::SourceFile);
        assert!(result.success);
        assert!(result.skipped);
        assert_eq!(result.cost_usd, 0.0);
    }

    #[test]
    fn test_generated_targets_filters_by_kind_and_outcome() {
        let outcome = RunOutcome {
            results: vec![
                JobResult::generated("src/a.rs", TargetKind::SourceFile, 0.01),
                JobResult::skipped("src/b.rs", TargetKind::SourceFile),
                JobResult::generated("src", TargetKind::PackageSummary, 0.01),
                JobResult::failed("src/c.rs", TargetKind::SourceFile, 0.0, "refused"),
            ],
            totals: RunTotals::default(),
        };
        let files = outcome.generated_targets(TargetKind::SourceFile);
        assert_eq!(files, vec![PathBuf::from("src/a.rs")]);
    }
}
