//! Top-level trigger state machine.
//!
//! External events (save, commit, manual invocation) enter here. The
//! orchestrator resolves per-path trigger decisions, filters ignored paths
//! before any cost is estimated, conservatively estimates the cascade,
//! gates the aggregate through the budget governor, and dispatches the
//! surviving set to the pipeline. Cascade re-dispatches are bounded by a
//! per-event escalation counter with a hard ceiling.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::budget::{BudgetGovernor, CostEstimator, MAX_AUTO_ESCALATIONS};
use crate::context::RunContext;
use crate::error::Result;
use crate::ledger::event_types;
use crate::pipeline::{GenerationPipeline, PipelineOptions, RunOutcome, TargetKind};
use crate::repo::{changed_files, IgnoreMatcher};
use crate::trigger::decision::{resolve_decision, TriggerType};

/// Estimate inflation applied to cascade totals. A deliberate over-estimate
/// so the aggregate gate errs toward refusing, never toward surprising.
const CASCADE_SAFETY_FACTOR: f64 = 1.5;

/// Assumed digest size for a not-yet-built package summary, in bytes.
const SUMMARY_DIGEST_BYTES: u64 = 2048;

/// Orchestrator states. One event moves Idle → Deciding → Estimating →
/// AwaitingBudget → Dispatching → Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Deciding,
    Estimating,
    AwaitingBudget,
    Dispatching,
}

/// Bounds cascade re-dispatches within one originating event.
///
/// Created at cascade start, destroyed at cascade end. The third dispatch
/// is the last permitted; the fourth attempt is refused.
#[derive(Debug)]
pub struct EscalationCounter {
    used: u32,
}

impl EscalationCounter {
    pub fn new() -> Self {
        Self { used: 0 }
    }

    /// Claim one dispatch slot. False once the ceiling is reached.
    pub fn try_acquire(&mut self) -> bool {
        if self.used >= MAX_AUTO_ESCALATIONS {
            return false;
        }
        self.used += 1;
        true
    }

    /// Dispatches claimed so far.
    pub fn used(&self) -> u32 {
        self.used
    }
}

impl Default for EscalationCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one originating event.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// One outcome per dispatch, in dispatch order (index 0 is the
    /// original set, later entries are cascades).
    pub dispatched: Vec<RunOutcome>,
    /// Budget refusal that stopped the event before any dispatch.
    pub refusal: Option<String>,
    /// Whether a cascade re-dispatch was refused at the ceiling.
    pub escalation_refused: bool,
    /// Dispatches performed.
    pub escalations_used: u32,
    /// Aggregate cost estimate the budget gate saw.
    pub estimated_cost: f64,
}

impl DispatchReport {
    /// Real cost across all dispatches.
    pub fn total_cost_usd(&self) -> f64 {
        self.dispatched
            .iter()
            .map(|outcome| outcome.totals.total_cost_usd)
            .sum()
    }

    /// Whether anything ran.
    pub fn was_dispatched(&self) -> bool {
        !self.dispatched.is_empty()
    }
}

/// Whether a path whose resolved trigger is `resolved` fires for `event`.
///
/// Later event classes subsume earlier ones: a path that regenerates on
/// save also regenerates at commit and push. Manual invocation fires
/// everything that is not disabled.
pub fn fires_on(resolved: TriggerType, event: TriggerType) -> bool {
    match event {
        TriggerType::Manual => !resolved.is_disabled(),
        TriggerType::OnSave => matches!(resolved, TriggerType::OnSave),
        TriggerType::OnCommit => matches!(resolved, TriggerType::OnSave | TriggerType::OnCommit),
        TriggerType::OnPush => matches!(
            resolved,
            TriggerType::OnSave | TriggerType::OnCommit | TriggerType::OnPush
        ),
        TriggerType::Disabled => false,
    }
}

/// Trigger state machine over one project root.
pub struct TriggerOrchestrator {
    ctx: Arc<RunContext>,
    pipeline: GenerationPipeline,
    governor: BudgetGovernor,
    estimator: CostEstimator,
    root: PathBuf,
    state: OrchestratorState,
}

impl TriggerOrchestrator {
    /// Orchestrator over a run context, a pipeline, and a project root.
    pub fn new(ctx: Arc<RunContext>, pipeline: GenerationPipeline, root: impl Into<PathBuf>) -> Self {
        let governor = ctx.config.governor();
        let estimator = ctx.config.estimator();
        Self {
            ctx,
            pipeline,
            governor,
            estimator,
            root: root.into(),
            state: OrchestratorState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// A file (or several) was saved.
    pub async fn on_file_save(&mut self, paths: &[PathBuf]) -> Result<DispatchReport> {
        self.handle_event(TriggerType::OnSave, paths.to_vec()).await
    }

    /// A commit happened; changed files come from git.
    pub async fn on_git_commit(&mut self, staged_only: bool) -> Result<DispatchReport> {
        let changed = changed_files(&self.root, staged_only, None).await?;
        let absolute = changed
            .into_iter()
            .map(|path| self.root.join(path))
            .collect();
        self.handle_event(TriggerType::OnCommit, absolute).await
    }

    /// Explicit user invocation on a set of paths.
    pub async fn on_manual_trigger(&mut self, paths: &[PathBuf]) -> Result<DispatchReport> {
        self.handle_event(TriggerType::Manual, paths.to_vec()).await
    }

    fn set_state(&mut self, state: OrchestratorState) {
        debug!(from = ?self.state, to = ?state, "orchestrator transition");
        self.state = state;
    }

    async fn handle_event(
        &mut self,
        event: TriggerType,
        paths: Vec<PathBuf>,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();

        // Deciding: drop ignored paths before anything costs, then keep
        // only paths whose resolved trigger fires for this event class.
        self.set_state(OrchestratorState::Deciding);
        let matcher = IgnoreMatcher::new(&self.root, &self.ctx.config.doc_generation.ignore);
        let mut survivors: Vec<PathBuf> = Vec::new();
        for path in paths {
            if matcher.is_ignored(&path) {
                debug!(path = %path.display(), "ignored path filtered before estimation");
                continue;
            }
            let label = self.relative_label(&path);
            let decision = resolve_decision(&self.ctx.config.triggers, &self.governor, &label);
            if fires_on(decision.trigger_type, event) {
                survivors.push(path);
            } else {
                debug!(
                    path = %path.display(),
                    resolved = decision.trigger_type.as_label(),
                    event = event.as_label(),
                    "trigger class does not fire for this event"
                );
            }
        }
        if survivors.is_empty() {
            info!(event = event.as_label(), "no paths to process for event");
            self.set_state(OrchestratorState::Idle);
            return Ok(report);
        }

        // Estimating: conservative aggregate for the files plus the
        // package summaries the cascade is expected to touch.
        self.set_state(OrchestratorState::Estimating);
        let model = self.ctx.config.models.default.clone();
        let mut estimated = 0.0;
        let mut parents: BTreeSet<PathBuf> = BTreeSet::new();
        for path in &survivors {
            let bytes = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len(),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot stat path, assuming empty");
                    0
                }
            };
            estimated += self.estimator.estimate_generation_sized(&model, bytes);
            if let Some(parent) = path.parent() {
                if parent.starts_with(&self.root) {
                    let _ = parents.insert(parent.to_path_buf());
                }
            }
        }
        estimated += parents.len() as f64
            * self
                .estimator
                .estimate_generation_sized(&model, SUMMARY_DIGEST_BYTES);
        estimated *= CASCADE_SAFETY_FACTOR;
        report.estimated_cost = estimated;

        // AwaitingBudget: one aggregate gate before anything runs.
        self.set_state(OrchestratorState::AwaitingBudget);
        let hourly_spend = self.ctx.ledger.hourly_spend(1.0)?;
        let decision = self.governor.check(estimated, None, hourly_spend);
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "budget refused".to_string());
            warn!(event = event.as_label(), %reason, "cascade refused by budget governor");
            self.log_event(
                event_types::BUDGET_BLOCK,
                json!({
                    "scope": "cascade",
                    "event": event.as_label(),
                    "estimated_cost": estimated,
                    "reason": reason,
                }),
            );
            report.refusal = Some(reason);
            self.set_state(OrchestratorState::Idle);
            return Ok(report);
        }

        // Dispatching: run the surviving set, then any cascaded summary
        // work, bounded by the escalation counter.
        self.set_state(OrchestratorState::Dispatching);
        let mut counter = EscalationCounter::new();
        let mut targets: Vec<(PathBuf, TargetKind)> = survivors
            .into_iter()
            .map(|path| (path, TargetKind::SourceFile))
            .collect();
        let options = PipelineOptions::default();

        while !targets.is_empty() {
            if !counter.try_acquire() {
                warn!(
                    event = event.as_label(),
                    ceiling = MAX_AUTO_ESCALATIONS,
                    pending = targets.len(),
                    "escalation ceiling reached, refusing further cascade"
                );
                self.log_event(
                    event_types::ESCALATION_REFUSED,
                    json!({
                        "event": event.as_label(),
                        "ceiling": MAX_AUTO_ESCALATIONS,
                        "pending_targets": targets.len(),
                    }),
                );
                report.escalation_refused = true;
                break;
            }

            self.log_event(
                event_types::DISPATCH,
                json!({
                    "event": event.as_label(),
                    "attempt": counter.used(),
                    "targets": targets.len(),
                }),
            );
            let outcome = self
                .pipeline
                .run_targets(&self.root, targets, &options)
                .await?;
            targets = self.cascade_targets(&outcome);
            report.dispatched.push(outcome);
        }

        report.escalations_used = counter.used();
        self.set_state(OrchestratorState::Idle);
        Ok(report)
    }

    /// Follow-up work implied by an outcome: a regenerated file makes its
    /// package summary stale; a regenerated summary does the same one
    /// level up. The project root itself is never summarized.
    fn cascade_targets(&self, outcome: &RunOutcome) -> Vec<(PathBuf, TargetKind)> {
        let mut parents: BTreeSet<PathBuf> = BTreeSet::new();
        let mut consider = |parent: Option<&Path>| {
            if let Some(parent) = parent {
                if parent.starts_with(&self.root) && parent != self.root {
                    let _ = parents.insert(parent.to_path_buf());
                }
            }
        };
        for file in outcome.generated_targets(TargetKind::SourceFile) {
            consider(file.parent());
        }
        for dir in outcome.generated_targets(TargetKind::PackageSummary) {
            consider(dir.parent());
        }
        parents
            .into_iter()
            .map(|dir| (dir, TargetKind::PackageSummary))
            .collect()
    }

    fn relative_label(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn log_event(&self, event_type: &str, metadata: serde_json::Value) {
        if let Err(err) = self.ctx.ledger.log(event_type, 0.0, metadata) {
            warn!(event_type, error = %err, "ledger write failed");
        }
    }
}
