//! Crate-level error rollup.

use thiserror::Error;

use crate::config::ConfigError;
use crate::ledger::LedgerError;
use crate::llm::LlmError;
use crate::repo::RepoError;

/// Any error the engine can surface to a caller.
#[derive(Error, Debug)]
pub enum QuillError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type used across the engine.
pub type Result<T> = std::result::Result<T, QuillError>;
