//! Anthropic messages-API client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::budget::CostEstimator;
use crate::config::ModelsConfig;
use crate::llm::{LlmClient, LlmError, LlmRequest, LlmResponse};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Environment variable holding the API key.
pub const API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";

/// HTTP client for the Anthropic messages API.
///
/// Cost is computed from the usage block the API returns, priced by the
/// configured per-model table.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    estimator: CostEstimator,
}

impl AnthropicClient {
    /// Client with an explicit key and the configured pricing table.
    pub fn new(api_key: impl Into<String>, models: &ModelsConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            estimator: CostEstimator::new(models.pricing.clone()),
        })
    }

    /// Client keyed from `ANTHROPIC_API_KEY`.
    pub fn from_env(models: &ModelsConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(API_KEY_ENV_VAR)
            .map_err(|_| LlmError::Transport(format!("{API_KEY_ENV_VAR} is not set")))?;
        Self::new(api_key, models)
    }

    /// Point the client at a different endpoint (local proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: request.system_context.as_deref(),
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|err| LlmError::MalformedResponse(err.to_string()))?;

        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();
        if content.is_empty() {
            return Err(LlmError::MalformedResponse(
                "response carried no text blocks".to_string(),
            ));
        }

        let cost_usd = self
            .estimator
            .model_cost(&request.model)
            .calculate_cost(parsed.usage.input_tokens, parsed.usage.output_tokens);

        Ok(LlmResponse {
            content,
            cost_usd,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}
