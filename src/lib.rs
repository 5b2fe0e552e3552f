//! quill — budget-governed documentation sync engine.
//!
//! quill keeps natural-language documentation of a codebase synchronized
//! with the code by triggering, budgeting, and executing LLM generation
//! whenever source changes. It never silently overspends, never loops
//! forever, and leaves a full audit trail of cost and decisions.
//!
//! The engine is four components, bottom up:
//!
//! - [`ledger`] — append-only, crash-durable cost ledger.
//! - [`budget`] — layered spending caps under immutable hard ceilings,
//!   and the governor every unit of work must clear.
//! - [`pipeline`] — bounded-concurrency generation engine with freshness
//!   skipping and deterministic fallback.
//! - [`trigger`] — the state machine turning external events into
//!   budget-gated dispatches with a bounded cascade.
//!
//! Everything process-wide lives in a [`RunContext`] constructed once at
//! run start and passed down by reference.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use quill::{config, context::RunContext, pipeline::{GenerationPipeline, PipelineOptions}};
//!
//! let cfg = config::load(project_root);
//! let ctx = Arc::new(RunContext::new(cfg)?);
//! let pipeline = GenerationPipeline::new(Arc::clone(&ctx), client);
//! let outcome = pipeline.run(project_root, &PipelineOptions::default()).await?;
//! ```

pub mod budget;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod pipeline;
pub mod repo;
pub mod trigger;
pub mod validate;

pub use context::RunContext;
pub use error::{QuillError, Result};
