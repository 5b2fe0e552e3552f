//! LLM client seam.
//!
//! The engine consumes the narrow [`LlmClient`] contract; the wire details
//! of any particular provider live behind it. The bundled
//! [`anthropic::AnthropicClient`] implements the contract over HTTP.

pub mod anthropic;

use async_trait::async_trait;
use thiserror::Error;

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    /// User prompt (already fully assembled).
    pub prompt: String,
    /// Model identifier.
    pub model: String,
    /// Optional system context.
    pub system_context: Option<String>,
    /// Output token bound.
    pub max_tokens: u32,
}

/// A successful generation with its real cost.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// Generated text.
    pub content: String,
    /// Actual cost of the call in USD.
    pub cost_usd: f64,
    /// Input tokens billed.
    pub input_tokens: u64,
    /// Output tokens billed.
    pub output_tokens: u64,
}

/// Failures of the LLM path.
#[derive(Error, Debug)]
pub enum LlmError {
    /// Transport-level failure (connection, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The API answered with an error status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The API answered 200 but the body did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// External LLM call contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate content for a request, returning real token usage and cost.
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Client for running without credentials: every call fails, so the
/// pipeline serves deterministic fallback templates at zero cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineClient;

#[async_trait]
impl LlmClient for OfflineClient {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
        Err(LlmError::Transport(
            "offline: no API credentials configured".to_string(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Scripted client: pops one canned outcome per call, repeating the
    /// last one when the script runs dry.
    pub struct ScriptedClient {
        script: Mutex<VecDeque<Result<LlmResponse, String>>>,
        last: Mutex<Option<Result<LlmResponse, String>>>,
        calls: AtomicU64,
    }

    impl ScriptedClient {
        pub fn new(script: Vec<Result<LlmResponse, String>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                last: Mutex::new(None),
                calls: AtomicU64::new(0),
            }
        }

        pub fn always_ok(content: &str, cost_usd: f64) -> Self {
            Self::new(vec![Ok(LlmResponse {
                content: content.to_string(),
                cost_usd,
                input_tokens: 100,
                output_tokens: 50,
            })])
        }

        pub fn always_failing(message: &str) -> Self {
            Self::new(vec![Err(message.to_string())])
        }

        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().expect("script lock");
                match script.pop_front() {
                    Some(outcome) => {
                        *self.last.lock().expect("last lock") = Some(outcome.clone());
                        outcome
                    }
                    None => self
                        .last
                        .lock()
                        .expect("last lock")
                        .clone()
                        .unwrap_or_else(|| Err("script empty".to_string())),
                }
            };
            next.map_err(LlmError::Transport)
        }
    }
}
