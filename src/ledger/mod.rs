//! Append-only cost ledger.
//!
//! Every cost-incurring or budget-relevant action the engine takes is
//! recorded here as an [`AuditEvent`], one JSON object per line in an
//! append-only file. The ledger is the single source of truth the budget
//! governor reads hourly spend from, and the audit trail operators read
//! after the fact.

pub mod event;
pub mod store;

pub use event::{event_types, generate_session_id, AuditEvent, LEDGER_SCHEMA_VERSION};
pub use store::{
    default_ledger_dir, AccuracyMetrics, CostLedger, EventQuery, LedgerConfig, LedgerError,
    LedgerResult,
};
