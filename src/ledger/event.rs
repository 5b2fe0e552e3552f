use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current ledger schema version.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// Well-known event types written by the engine.
pub mod event_types {
    /// A completed LLM generation call, carrying its real cost.
    pub const LLM_CALL: &str = "llm_call";
    /// A job skipped because its freshness record matched.
    pub const SKIP_FRESH: &str = "skip_fresh";
    /// A job refused by the budget governor before any cost was incurred.
    pub const BUDGET_BLOCK: &str = "budget_block";
    /// Deterministic fallback content used after an LLM failure.
    pub const FALLBACK_USED: &str = "fallback_used";
    /// Generated output rejected by the sanity rules.
    pub const QUALITY_FAILURE: &str = "quality_failure";
    /// Outcome of checking one claimed file/symbol reference.
    pub const NAV_VALIDATION: &str = "nav_validation";
    /// A cascade re-dispatch refused at the escalation ceiling.
    pub const ESCALATION_REFUSED: &str = "escalation_refused";
    /// A trigger dispatch accepted and handed to the pipeline.
    pub const DISPATCH: &str = "dispatch";
}

/// Immutable audit event, one per cost-incurring or budget-relevant action.
///
/// Events are append-only; ordering is append order within a segment, and
/// segments are totally ordered by rotation sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Ledger schema version.
    pub schema_version: u32,
    /// Timestamp when the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Event type (see [`event_types`]).
    pub event_type: String,
    /// Cost incurred by this action in USD. Zero for free actions.
    pub cost_usd: f64,
    /// Session identifier of the recording process.
    pub session_id: String,
    /// Arbitrary JSON payload describing the action.
    pub metadata: Value,
}

impl AuditEvent {
    /// Create a new event stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        cost_usd: f64,
        session_id: impl Into<String>,
        metadata: Value,
    ) -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            timestamp: Utc::now(),
            event_type: event_type.into(),
            cost_usd,
            session_id: session_id.into(),
            metadata,
        }
    }
}

/// Generate a process-scoped session identifier.
///
/// Millisecond timestamp plus pid keeps ids unique per host without a
/// dedicated randomness dependency.
pub fn generate_session_id() -> String {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let pid = std::process::id();
    format!("s-{}-{}", timestamp_ms, pid)
}
