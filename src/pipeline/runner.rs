//! The bounded-concurrency generation engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use ignore::WalkBuilder;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::budget::{BudgetGovernor, CostEstimator};
use crate::context::{default_worker_count, RunContext};
use crate::error::Result;
use crate::ledger::event_types;
use crate::llm::{LlmClient, LlmRequest};
use crate::pipeline::fallback::{
    fallback_summary_template, fallback_template, BasicSymbolScanner, SymbolProvider,
};
use crate::pipeline::freshness::{content_hash, FreshnessRecord};
use crate::pipeline::job::{Job, JobResult, RunOutcome, RunTotals, TargetKind};
use crate::pipeline::quality::QualityRules;
use crate::repo::IgnoreMatcher;
use crate::validate::{extract_claimed_paths, FsReferenceValidator, ReferenceValidator};

const SYSTEM_CONTEXT: &str = "You are a technical writer producing reference documentation \
for a codebase. Write concise markdown. Only reference files and symbols that exist.";

/// Most claimed references checked per generated artifact.
const MAX_REFERENCE_CHECKS: usize = 16;

/// Options for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Walk subdirectories when enumerating candidates.
    pub recursive: bool,
    /// Regenerate even when the freshness record matches.
    pub force: bool,
    /// Stop launching new jobs once real spend reaches this, in USD.
    pub run_budget: Option<f64>,
    /// Concurrently processed targets; defaults to the CPU-derived bound.
    pub workers: Option<usize>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            force: false,
            run_budget: None,
            workers: None,
        }
    }
}

/// Budget-governed concurrent documentation generator.
///
/// Two semaphores gate concurrency: the context's process-wide LLM-call
/// limiter, and a per-target sub-unit limiter created for each file with
/// multiple symbols. They are independent of each other.
#[derive(Clone)]
pub struct GenerationPipeline {
    ctx: Arc<RunContext>,
    client: Arc<dyn LlmClient>,
    symbols: Arc<dyn SymbolProvider>,
    validator: Arc<dyn ReferenceValidator>,
    governor: BudgetGovernor,
    estimator: CostEstimator,
    quality: QualityRules,
    llm_calls: Arc<AtomicU64>,
}

impl GenerationPipeline {
    /// Pipeline over a run context and an LLM client, with the default
    /// symbol scanner and filesystem reference validator.
    pub fn new(ctx: Arc<RunContext>, client: Arc<dyn LlmClient>) -> Self {
        let governor = ctx.config.governor();
        let estimator = ctx.config.estimator();
        let quality = QualityRules::new(ctx.config.doc_generation.max_output_bytes);
        Self {
            ctx,
            client,
            symbols: Arc::new(BasicSymbolScanner),
            validator: Arc::new(FsReferenceValidator),
            governor,
            estimator,
            quality,
            llm_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Swap the symbol provider.
    pub fn with_symbol_provider(mut self, symbols: Arc<dyn SymbolProvider>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Swap the reference validator.
    pub fn with_validator(mut self, validator: Arc<dyn ReferenceValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Enumerate candidates under `root` and run them.
    pub async fn run(&self, root: &Path, options: &PipelineOptions) -> Result<RunOutcome> {
        let candidates = self.enumerate(root, options.recursive)?;
        let targets = candidates
            .into_iter()
            .map(|path| (path, TargetKind::SourceFile))
            .collect();
        self.run_targets(root, targets, options).await
    }

    /// Run an explicit set of targets.
    ///
    /// The run budget is checked before each launch; jobs already started
    /// always run to completion. Results merge as they arrive; ordering
    /// across targets is not guaranteed.
    pub async fn run_targets(
        &self,
        root: &Path,
        targets: Vec<(PathBuf, TargetKind)>,
        options: &PipelineOptions,
    ) -> Result<RunOutcome> {
        let workers = options.workers.unwrap_or_else(default_worker_count).max(1);
        let candidates = targets.len();
        info!(candidates, workers, "pipeline run starting");

        let shared: Arc<Mutex<(RunTotals, Vec<JobResult>)>> =
            Arc::new(Mutex::new((RunTotals::default(), Vec::new())));
        let root = root.to_path_buf();
        let calls_before = self.llm_calls.load(Ordering::SeqCst);

        stream::iter(targets)
            .map(|(path, kind)| {
                let pipeline = self.clone();
                let shared = Arc::clone(&shared);
                let root = root.clone();
                let options = options.clone();
                async move {
                    // Cooperative budget cutoff: checked at launch, never
                    // mid-job.
                    let launch = {
                        let mut guard = lock_shared(&shared);
                        let exhausted = options
                            .run_budget
                            .is_some_and(|budget| guard.0.total_cost_usd >= budget);
                        if exhausted {
                            guard.0.unlaunched += 1;
                            guard.0.budget_exhausted = true;
                        }
                        !exhausted
                    };
                    if !launch {
                        debug!(target = %path.display(), "run budget reached, not launching");
                        return;
                    }

                    let result = pipeline
                        .process_target(&root, &path, kind, options.force)
                        .await;
                    let mut guard = lock_shared(&shared);
                    guard.0.record(&result);
                    guard.1.push(result);
                }
            })
            .buffer_unordered(workers)
            .collect::<Vec<()>>()
            .await;

        let (mut totals, results) = match Arc::try_unwrap(shared) {
            Ok(mutex) => match mutex.into_inner() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            },
            Err(shared) => lock_shared(&shared).clone(),
        };
        totals.candidates = candidates;
        totals.llm_calls = self.llm_calls.load(Ordering::SeqCst) - calls_before;

        info!(
            generated = totals.generated,
            skipped = totals.skipped,
            blocked = totals.blocked,
            failed = totals.failed,
            cost_usd = totals.total_cost_usd,
            "pipeline run finished"
        );
        Ok(RunOutcome { results, totals })
    }

    /// Gitignore-aware candidate enumeration with extension and ignore
    /// filtering. The output tree is never a candidate.
    fn enumerate(&self, root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
        let matcher = IgnoreMatcher::new(root, &self.ctx.config.doc_generation.ignore);
        let output_root = root.join(&self.ctx.config.doc_generation.output_dir);
        let extensions = &self.ctx.config.doc_generation.include_extensions;

        let mut walker = WalkBuilder::new(root);
        if !recursive {
            walker.max_depth(Some(1));
        }

        let mut candidates = Vec::new();
        for entry in walker.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "walk error, skipping entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || path.starts_with(&output_root) {
                continue;
            }
            let matches_extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e == ext));
            if !matches_extension || matcher.is_ignored(path) {
                continue;
            }
            candidates.push(path.to_path_buf());
        }
        candidates.sort();
        Ok(candidates)
    }

    async fn process_target(
        &self,
        root: &Path,
        path: &Path,
        kind: TargetKind,
        force: bool,
    ) -> JobResult {
        match kind {
            TargetKind::SourceFile => self.process_file(root, path, force).await,
            TargetKind::PackageSummary => self.process_summary(root, path, force).await,
        }
    }

    async fn process_file(&self, root: &Path, path: &Path, force: bool) -> JobResult {
        let kind = TargetKind::SourceFile;
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) => {
                return JobResult::failed(path, kind, 0.0, format!("read failed: {err}"));
            }
        };

        let hash = {
            let content = content.clone();
            match tokio::task::spawn_blocking(move || content_hash(content.as_bytes())).await {
                Ok(hash) => hash,
                Err(err) => return JobResult::failed(path, kind, 0.0, format!("hash task: {err}")),
            }
        };

        let relative = relative_label(root, path);
        let output = self.output_path(root, path);

        if !force {
            if let Some(record) = FreshnessRecord::load(&output) {
                if record.is_fresh(&hash) {
                    self.log_event(
                        event_types::SKIP_FRESH,
                        0.0,
                        json!({"target": relative, "hash": hash}),
                    );
                    return JobResult::skipped(path, kind);
                }
            }
        }

        let estimated = self
            .estimator
            .estimate_generation(&self.ctx.config.models.default, &content);
        let job = Job::new(path, kind, estimated);
        if let Some(refusal) = self.preflight(&relative, &job) {
            return JobResult::failed(job.target, kind, 0.0, refusal);
        }

        let symbols = self.symbols.symbols(path, &content);
        let generation = if symbols.len() > 1 {
            self.generate_by_symbol(&relative, &content, &symbols).await
        } else {
            let prompt = file_prompt(&relative, &content);
            match self.generate_unit(&relative, prompt).await {
                Ok((text, cost)) => Generation {
                    content: text,
                    cost_usd: cost,
                    failed_units: 0,
                },
                Err(message) => {
                    if self.ctx.config.doc_generation.fallback_enabled {
                        self.log_event(
                            event_types::FALLBACK_USED,
                            0.0,
                            json!({"target": relative, "reason": message}),
                        );
                        Generation {
                            content: fallback_template(Path::new(&relative), &symbols),
                            cost_usd: 0.0,
                            failed_units: 0,
                        }
                    } else {
                        return JobResult::failed(path, kind, 0.0, message);
                    }
                }
            }
        };

        if generation.failed_units > 0 {
            return JobResult::failed(
                path,
                kind,
                generation.cost_usd,
                format!("{} generation unit(s) failed", generation.failed_units),
            );
        }

        if let Err(issue) = self.quality.check(&generation.content) {
            self.log_event(
                event_types::QUALITY_FAILURE,
                0.0,
                json!({"target": relative, "issue": issue.to_string()}),
            );
            return JobResult::failed(
                path,
                kind,
                generation.cost_usd,
                format!("quality: {issue}"),
            );
        }

        self.validate_references(root, &relative, &generation.content);

        let symbol_hashes: BTreeMap<String, String> = symbols
            .iter()
            .map(|s| (s.name.clone(), content_hash(s.signature.as_bytes())))
            .collect();
        let record = FreshnessRecord::new(hash, self.ctx.config.models.default.clone())
            .with_symbol_hashes(symbol_hashes);
        if let Err(err) = self.write_artifact(&output, &generation.content, &record).await {
            return JobResult::failed(
                path,
                kind,
                generation.cost_usd,
                format!("write failed: {err}"),
            );
        }

        JobResult::generated(path, kind, generation.cost_usd)
    }

    async fn process_summary(&self, root: &Path, dir: &Path, force: bool) -> JobResult {
        let kind = TargetKind::PackageSummary;
        let entries = match self.summary_entries(dir) {
            Ok(entries) => entries,
            Err(err) => return JobResult::failed(dir, kind, 0.0, format!("list failed: {err}")),
        };

        let relative = relative_label(root, dir);
        // The summary's "source" is a deterministic digest of the package
        // contents, so freshness tracks membership and file changes.
        let digest: String = entries
            .iter()
            .map(|(name, size)| format!("{name} {size}\n"))
            .collect();
        let hash = content_hash(digest.as_bytes());
        let output = self.summary_output_path(root, dir);

        if !force {
            if let Some(record) = FreshnessRecord::load(&output) {
                if record.is_fresh(&hash) {
                    self.log_event(
                        event_types::SKIP_FRESH,
                        0.0,
                        json!({"target": relative, "kind": "package_summary"}),
                    );
                    return JobResult::skipped(dir, kind);
                }
            }
        }

        let estimated = self
            .estimator
            .estimate_generation(&self.ctx.config.models.default, &digest);
        let job = Job::new(dir, kind, estimated);
        if let Some(refusal) = self.preflight(&relative, &job) {
            return JobResult::failed(job.target, kind, 0.0, refusal);
        }

        let names: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();
        let prompt = summary_prompt(&relative, &names);
        let (content, cost_usd) = match self.generate_unit(&relative, prompt).await {
            Ok(done) => done,
            Err(message) => {
                if self.ctx.config.doc_generation.fallback_enabled {
                    self.log_event(
                        event_types::FALLBACK_USED,
                        0.0,
                        json!({"target": relative, "reason": message}),
                    );
                    (fallback_summary_template(Path::new(&relative), &names), 0.0)
                } else {
                    return JobResult::failed(dir, kind, 0.0, message);
                }
            }
        };

        if let Err(issue) = self.quality.check(&content) {
            self.log_event(
                event_types::QUALITY_FAILURE,
                0.0,
                json!({"target": relative, "issue": issue.to_string()}),
            );
            return JobResult::failed(dir, kind, cost_usd, format!("quality: {issue}"));
        }

        let record = FreshnessRecord::new(hash, self.ctx.config.models.default.clone());
        if let Err(err) = self.write_artifact(&output, &content, &record).await {
            return JobResult::failed(dir, kind, cost_usd, format!("write failed: {err}"));
        }
        JobResult::generated(dir, kind, cost_usd)
    }

    /// Per-symbol generation under the per-target sub-unit limiter.
    ///
    /// Sections finish in any order but merge in declaration order before
    /// the file is marked done. A failed section falls back to the
    /// deterministic stub when fallback is enabled.
    async fn generate_by_symbol(
        &self,
        relative: &str,
        content: &str,
        symbols: &[crate::pipeline::fallback::SymbolSummary],
    ) -> Generation {
        let per_target = Arc::new(Semaphore::new(
            self.ctx.config.doc_generation.per_target_concurrency.max(1),
        ));
        let fallback_enabled = self.ctx.config.doc_generation.fallback_enabled;

        let sections = futures::future::join_all(symbols.iter().map(|symbol| {
            let per_target = Arc::clone(&per_target);
            let symbol = symbol.clone();
            let prompt = symbol_prompt(relative, &symbol.signature, content);
            let label = format!("{relative}#{}", symbol.name);
            async move {
                let _permit = per_target.acquire().await.ok();
                let outcome = self.generate_unit(&label, prompt).await;
                (symbol, outcome)
            }
        }))
        .await;

        let mut merged = format!("# {relative}\n\n");
        let mut cost_usd = 0.0;
        let mut failed_units = 0;
        for (symbol, outcome) in sections {
            match outcome {
                Ok((text, cost)) => {
                    cost_usd += cost;
                    merged.push_str(&format!("## {}\n\n{}\n\n", symbol.name, text.trim()));
                }
                Err(message) if fallback_enabled => {
                    self.log_event(
                        event_types::FALLBACK_USED,
                        0.0,
                        json!({"target": relative, "symbol": symbol.name, "reason": message}),
                    );
                    merged.push_str(&format!(
                        "## {}\n\n`{}`\n\nReference stub generated from static metadata.\n\n",
                        symbol.name, symbol.signature
                    ));
                }
                Err(_) => failed_units += 1,
            }
        }

        Generation {
            content: merged,
            cost_usd,
            failed_units,
        }
    }

    /// One LLM call under the process-wide limiter, recorded on the ledger.
    async fn generate_unit(&self, label: &str, prompt: String) -> std::result::Result<(String, f64), String> {
        let _permit = self
            .ctx
            .llm_limiter
            .acquire()
            .await
            .map_err(|_| "LLM limiter closed".to_string())?;

        let request = LlmRequest {
            prompt,
            model: self.ctx.config.models.default.clone(),
            system_context: Some(SYSTEM_CONTEXT.to_string()),
            max_tokens: self.ctx.config.models.max_tokens,
        };
        let _ = self.llm_calls.fetch_add(1, Ordering::SeqCst);
        match self.client.generate(request).await {
            Ok(response) => {
                self.log_event(
                    event_types::LLM_CALL,
                    response.cost_usd,
                    json!({
                        "target": label,
                        "model": self.ctx.config.models.default,
                        "input_tokens": response.input_tokens,
                        "output_tokens": response.output_tokens,
                    }),
                );
                Ok((response.content, response.cost_usd))
            }
            Err(err) => {
                warn!(target = label, error = %err, "LLM call failed");
                Err(err.to_string())
            }
        }
    }

    /// Governor gate. A refusal records a blocked result with zero LLM
    /// calls and an actionable reason.
    fn preflight(&self, relative: &str, job: &Job) -> Option<String> {
        let hourly_spend = match self.ctx.ledger.hourly_spend(1.0) {
            Ok(spend) => spend,
            Err(err) => {
                warn!(error = %err, "hourly spend unavailable, refusing work");
                return Some(format!("ledger unavailable: {err}"));
            }
        };
        let decision = self
            .governor
            .check(job.estimated_cost, Some(relative), hourly_spend);
        if decision.allowed {
            return None;
        }
        let reason = decision
            .reason
            .unwrap_or_else(|| "budget refused".to_string());
        warn!(target = relative, %reason, "budget governor refused job");
        self.log_event(
            event_types::BUDGET_BLOCK,
            0.0,
            json!({
                "target": relative,
                "estimated_cost": job.estimated_cost,
                "attempt": job.attempt,
                "reason": reason,
            }),
        );
        Some(format!("budget: {reason}"))
    }

    /// Check claimed references and feed the accuracy metrics.
    fn validate_references(&self, root: &Path, relative: &str, content: &str) {
        for claim in extract_claimed_paths(content, MAX_REFERENCE_CHECKS) {
            let outcome = self
                .validator
                .validate(Path::new(&claim), None, root);
            self.log_event(
                event_types::NAV_VALIDATION,
                0.0,
                json!({
                    "target": relative,
                    "claim": claim,
                    "is_valid": outcome.is_valid,
                    "confidence": outcome.confidence,
                    "suggestion": outcome.suggestion,
                }),
            );
        }
    }

    async fn write_artifact(
        &self,
        output: &Path,
        content: &str,
        record: &FreshnessRecord,
    ) -> std::io::Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, content).await?;
        record.store(output)
    }

    fn output_path(&self, root: &Path, path: &Path) -> PathBuf {
        let relative = path.strip_prefix(root).unwrap_or(path);
        root.join(&self.ctx.config.doc_generation.output_dir)
            .join(relative.with_extension("md"))
    }

    fn summary_output_path(&self, root: &Path, dir: &Path) -> PathBuf {
        let relative = dir.strip_prefix(root).unwrap_or(dir);
        root.join(&self.ctx.config.doc_generation.output_dir)
            .join(relative)
            .join("index.md")
    }

    /// Documentable children of a package directory with their sizes.
    fn summary_entries(&self, dir: &Path) -> std::io::Result<Vec<(String, u64)>> {
        let extensions = &self.ctx.config.doc_generation.include_extensions;
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e == ext));
            if matches {
                let name = entry.file_name().to_string_lossy().into_owned();
                entries.push((name, entry.metadata()?.len()));
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn log_event(&self, event_type: &str, cost_usd: f64, metadata: serde_json::Value) {
        if let Err(err) = self.ctx.ledger.log(event_type, cost_usd, metadata) {
            warn!(event_type, error = %err, "ledger write failed");
        }
    }
}

struct Generation {
    content: String,
    cost_usd: f64,
    failed_units: usize,
}

type SharedState = Mutex<(RunTotals, Vec<JobResult>)>;

fn lock_shared(shared: &SharedState) -> std::sync::MutexGuard<'_, (RunTotals, Vec<JobResult>)> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn relative_label(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn file_prompt(relative: &str, content: &str) -> String {
    format!(
        "Write reference documentation for the source file `{relative}`.\n\n```\n{content}\n```\n"
    )
}

fn symbol_prompt(relative: &str, signature: &str, content: &str) -> String {
    format!(
        "Write reference documentation for `{signature}` from `{relative}`.\n\n```\n{content}\n```\n"
    )
}

fn summary_prompt(relative: &str, names: &[String]) -> String {
    let listing = names
        .iter()
        .map(|name| format!("- {name}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Write a package-level summary for the directory `{relative}` containing:\n{listing}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuillConfig;
    use crate::ledger::{CostLedger, LedgerConfig};
    use crate::llm::testing::ScriptedClient;
    use chrono::{DateTime, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn test_ctx(root: &Path, mutate: impl FnOnce(&mut QuillConfig)) -> Arc<RunContext> {
        let mut config = QuillConfig::default();
        config.limits.ledger_dir = Some(root.join(".quill-ledger"));
        mutate(&mut config);
        let ledger = CostLedger::open(LedgerConfig::new(root.join(".quill-ledger")), "s-test")
            .expect("open ledger");
        Arc::new(RunContext::with_ledger(config, ledger, "s-test".to_string()))
    }

    fn pipeline_with(
        root: &Path,
        client: Arc<ScriptedClient>,
        mutate: impl FnOnce(&mut QuillConfig),
    ) -> GenerationPipeline {
        let ctx = test_ctx(root, mutate);
        GenerationPipeline::new(ctx, client)
    }

    #[tokio::test]
    async fn test_rerun_on_unchanged_files_skips_at_zero_cost() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("app.py"), "x = 1\n").expect("write");
        let client = Arc::new(ScriptedClient::always_ok("# app\n\nDocs body.\n", 0.01));
        let pipeline = pipeline_with(temp.path(), Arc::clone(&client), |_| {});

        let first = pipeline
            .run(temp.path(), &PipelineOptions::default())
            .await
            .expect("first run");
        assert_eq!(first.totals.generated, 1);
        assert!((first.totals.total_cost_usd - 0.01).abs() < 1e-9);

        let second = pipeline
            .run(temp.path(), &PipelineOptions::default())
            .await
            .expect("second run");
        assert_eq!(second.totals.skipped, 1);
        assert_eq!(second.totals.generated, 0);
        assert_eq!(second.totals.total_cost_usd, 0.0);
        for result in &second.results {
            assert!(result.skipped);
            assert!(result.success);
            assert_eq!(result.cost_usd, 0.0);
        }
        // Only the first run reached the client.
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_force_regenerates_fresh_targets() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("app.py"), "x = 1\n").expect("write");
        let client = Arc::new(ScriptedClient::always_ok("# app\n\nDocs.\n", 0.01));
        let pipeline = pipeline_with(temp.path(), Arc::clone(&client), |_| {});

        let options = PipelineOptions::default();
        pipeline.run(temp.path(), &options).await.expect("first");

        let forced = PipelineOptions {
            force: true,
            ..PipelineOptions::default()
        };
        let second = pipeline.run(temp.path(), &forced).await.expect("forced");
        assert_eq!(second.totals.generated, 1);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_llm_failure_with_fallback_yields_template_at_zero_cost() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("app.py"), "x = 1\n").expect("write");
        let client = Arc::new(ScriptedClient::always_failing("connection refused"));
        let pipeline = pipeline_with(temp.path(), client, |_| {});

        let outcome = pipeline
            .run(temp.path(), &PipelineOptions::default())
            .await
            .expect("run");
        assert_eq!(outcome.results.len(), 1);
        let result = &outcome.results[0];
        assert!(result.success);
        assert_eq!(result.cost_usd, 0.0);

        let artifact = temp.path().join("docs/api/app.md");
        let written = fs::read_to_string(&artifact).expect("artifact");
        assert_eq!(written, fallback_template(Path::new("app.py"), &[]));
    }

    #[tokio::test]
    async fn test_llm_failure_without_fallback_fails_job() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("app.py"), "x = 1\n").expect("write");
        let client = Arc::new(ScriptedClient::always_failing("connection refused"));
        let pipeline = pipeline_with(temp.path(), client, |config| {
            config.doc_generation.fallback_enabled = false;
        });

        let outcome = pipeline
            .run(temp.path(), &PipelineOptions::default())
            .await
            .expect("run");
        assert_eq!(outcome.totals.failed, 1);
        assert!(!outcome.results[0].success);
    }

    #[tokio::test]
    async fn test_budget_refusal_records_blocked_result_without_llm_calls() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("app.py"), "x = 1\n").expect("write");
        let client = Arc::new(ScriptedClient::always_ok("# docs\n\nBody.\n", 0.01));
        let pipeline = pipeline_with(temp.path(), Arc::clone(&client), |config| {
            config.limits.max_cost_per_event = 0.0;
        });

        let outcome = pipeline
            .run(temp.path(), &PipelineOptions::default())
            .await
            .expect("run");
        assert_eq!(outcome.totals.blocked, 1);
        assert_eq!(outcome.totals.generated, 0);
        assert_eq!(client.calls(), 0);
        let error = outcome.results[0].error.as_deref().expect("reason");
        assert!(error.starts_with("budget:"));
    }

    #[tokio::test]
    async fn test_run_budget_stops_launching_new_jobs() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("a.py"), "x = 1\n").expect("write");
        fs::write(temp.path().join("b.py"), "y = 2\n").expect("write");
        let client = Arc::new(ScriptedClient::always_ok("# docs\n\nBody.\n", 0.02));
        let pipeline = pipeline_with(temp.path(), client, |_| {});

        let options = PipelineOptions {
            run_budget: Some(0.01),
            workers: Some(1),
            ..PipelineOptions::default()
        };
        let outcome = pipeline.run(temp.path(), &options).await.expect("run");
        assert_eq!(outcome.totals.generated, 1);
        assert_eq!(outcome.totals.unlaunched, 1);
        assert!(outcome.totals.budget_exhausted);
    }

    #[tokio::test]
    async fn test_error_marker_output_is_a_quality_failure() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("app.py"), "x = 1\n").expect("write");
        let client = Arc::new(ScriptedClient::always_ok("Error: rate limit exceeded", 0.01));
        let pipeline = pipeline_with(temp.path(), client, |_| {});

        let outcome = pipeline
            .run(temp.path(), &PipelineOptions::default())
            .await
            .expect("run");
        assert_eq!(outcome.totals.failed, 1);
        let error = outcome.results[0].error.as_deref().expect("error");
        assert!(error.starts_with("quality:"));
        // The cost was incurred even though the output was rejected.
        assert!((outcome.results[0].cost_usd - 0.01).abs() < 1e-9);

        let quality_events = pipeline
            .ctx
            .ledger
            .query(DateTime::<Utc>::MIN_UTC, Some(event_types::QUALITY_FAILURE))
            .expect("query")
            .count();
        assert_eq!(quality_events, 1);
    }

    #[tokio::test]
    async fn test_multi_symbol_file_merges_sections_in_order() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(
            temp.path().join("lib.rs"),
            "pub fn alpha() {}\n\npub fn beta() {}\n",
        )
        .expect("write");
        let client = Arc::new(ScriptedClient::always_ok("Section body.", 0.005));
        let pipeline = pipeline_with(temp.path(), Arc::clone(&client), |_| {});

        let outcome = pipeline
            .run(temp.path(), &PipelineOptions::default())
            .await
            .expect("run");
        assert_eq!(outcome.totals.generated, 1);
        assert_eq!(client.calls(), 2);
        assert!((outcome.results[0].cost_usd - 0.01).abs() < 1e-9);

        let written = fs::read_to_string(temp.path().join("docs/api/lib.md")).expect("artifact");
        let alpha = written.find("## alpha").expect("alpha section");
        let beta = written.find("## beta").expect("beta section");
        assert!(alpha < beta, "sections merge in declaration order");
    }

    #[tokio::test]
    async fn test_enumeration_respects_extensions_ignores_and_output_dir() {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::create_dir_all(temp.path().join("docs/api")).expect("mkdir");
        fs::write(temp.path().join("src/a.rs"), "pub fn a() {}\n").expect("write");
        fs::write(temp.path().join("src/skip.rs"), "pub fn s() {}\n").expect("write");
        fs::write(temp.path().join("notes.txt"), "not source\n").expect("write");
        fs::write(temp.path().join("docs/api/old.rs"), "fn stale() {}\n").expect("write");

        let client = Arc::new(ScriptedClient::always_ok("# docs\n\nBody.\n", 0.0));
        let pipeline = pipeline_with(temp.path(), client, |config| {
            config.doc_generation.ignore = vec!["src/skip.rs".to_string()];
        });

        let candidates = pipeline.enumerate(temp.path(), true).expect("enumerate");
        assert_eq!(candidates, vec![temp.path().join("src/a.rs")]);
    }

    #[tokio::test]
    async fn test_package_summary_generation_and_freshness() {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/a.rs"), "pub fn a() {}\n").expect("write");
        let client = Arc::new(ScriptedClient::always_ok("# src\n\nSummary.\n", 0.01));
        let pipeline = pipeline_with(temp.path(), Arc::clone(&client), |_| {});

        let targets = vec![(temp.path().join("src"), TargetKind::PackageSummary)];
        let first = pipeline
            .run_targets(temp.path(), targets.clone(), &PipelineOptions::default())
            .await
            .expect("first");
        assert_eq!(first.totals.generated, 1);
        assert!(temp.path().join("docs/api/src/index.md").exists());

        // Unchanged package membership: the summary is fresh.
        let second = pipeline
            .run_targets(temp.path(), targets, &PipelineOptions::default())
            .await
            .expect("second");
        assert_eq!(second.totals.skipped, 1);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_reference_validation_feeds_accuracy_metrics() {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/real.rs"), "pub fn r() {}\n").expect("write");
        fs::write(temp.path().join("app.py"), "x = 1\n").expect("write");

        let client = Arc::new(ScriptedClient::always_ok(
            "# app\n\nSee `src/real.rs` and `src/phantom.rs`.\n",
            0.01,
        ));
        let pipeline = pipeline_with(temp.path(), client, |config| {
            // Keep the run to the one python file.
            config.doc_generation.include_extensions = vec!["py".to_string()];
        });

        pipeline
            .run(temp.path(), &PipelineOptions::default())
            .await
            .expect("run");

        let metrics = pipeline.ctx.ledger.accuracy_metrics().expect("metrics");
        assert_eq!(metrics.total, 2);
        assert_eq!(metrics.validated_ok, 1);
        assert!((metrics.accuracy_pct - 50.0).abs() < 1e-9);
    }
}
