//! Budget-governed generation pipeline.
//!
//! For each candidate target the pipeline checks freshness, asks the
//! budget governor for clearance, generates documentation through the LLM
//! client under bounded concurrency (with a deterministic fallback when
//! the LLM path fails), sanity-checks the output, and records everything
//! on the cost ledger.

pub mod fallback;
pub mod freshness;
pub mod job;
pub mod quality;
pub mod runner;

pub use fallback::{
    fallback_summary_template, fallback_template, BasicSymbolScanner, SymbolProvider,
    SymbolSummary,
};
pub use freshness::{content_hash, sidecar_path, FreshnessRecord, SIDECAR_SUFFIX};
pub use job::{Job, JobResult, RunOutcome, RunTotals, TargetKind};
pub use quality::{QualityIssue, QualityRules};
pub use runner::{GenerationPipeline, PipelineOptions};
