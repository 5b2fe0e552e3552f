//! Shared run context.
//!
//! Everything process-wide is constructed once at run start and passed
//! down by reference: the resolved configuration, the ledger handle, and
//! the global LLM concurrency limiter. No lazy singletons.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::QuillConfig;
use crate::ledger::{generate_session_id, CostLedger, LedgerConfig, LedgerResult};

/// Bound on the CPU-bound worker pool used for hashing and parsing work.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
        .min(8)
}

/// Process-wide state for one engine run.
pub struct RunContext {
    /// Session identifier stamped into every ledger event.
    pub session_id: String,
    /// Fully resolved configuration.
    pub config: QuillConfig,
    /// The cost ledger; single writer for this process.
    pub ledger: CostLedger,
    /// Global bound on concurrent LLM calls, shared by every job in the run.
    pub llm_limiter: Arc<Semaphore>,
}

impl RunContext {
    /// Build the context: open the ledger and size the LLM limiter from
    /// configuration (already clamped to [1, 100] at the env layer).
    pub fn new(config: QuillConfig) -> LedgerResult<Self> {
        let session_id = generate_session_id();
        let ledger_config = match &config.limits.ledger_dir {
            Some(dir) => LedgerConfig::new(dir.clone()),
            None => LedgerConfig::default(),
        };
        let ledger = CostLedger::open(ledger_config, session_id.clone())?;
        Ok(Self::with_ledger(config, ledger, session_id))
    }

    /// Build the context around an already-open ledger (tests, embedders).
    pub fn with_ledger(config: QuillConfig, ledger: CostLedger, session_id: String) -> Self {
        let permits = config
            .doc_generation
            .max_concurrent_llm_calls
            .clamp(1, 100);
        Self {
            session_id,
            config,
            ledger,
            llm_limiter: Arc::new(Semaphore::new(permits)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_limiter_sized_from_config() {
        let temp = TempDir::new().expect("temp dir");
        let mut config = QuillConfig::default();
        config.doc_generation.max_concurrent_llm_calls = 7;
        let ledger = CostLedger::open(LedgerConfig::new(temp.path()), "s-test").expect("ledger");
        let ctx = RunContext::with_ledger(config, ledger, "s-test".to_string());
        assert_eq!(ctx.llm_limiter.available_permits(), 7);
    }

    #[test]
    fn test_worker_count_is_bounded() {
        let workers = default_worker_count();
        assert!(workers >= 1 && workers <= 8);
    }
}
