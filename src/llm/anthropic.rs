//! Anthropic API client implementation
//!
//! Text-only Messages API client implementing `ReasoningClient`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::llm::client::{LlmError, ReasoningClient, Usage};

/// Anthropic API base URL
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model to use
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default max tokens
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Default environment variable holding the key
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Configuration for the Anthropic client
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub base_url: String,
    pub api_key_env: String,
    /// Extra attempts for retryable failures
    pub max_retries: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(300),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            max_retries: 2,
        }
    }
}

impl AnthropicConfig {
    /// Create a new config with a specific model
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Anthropic API client
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    config: AnthropicConfig,
    usage: Arc<Mutex<Usage>>,
}

impl AnthropicClient {
    /// Create a client reading the key from `config.api_key_env`
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| LlmError::MissingApiKey {
            env_var: config.api_key_env.clone(),
        })?;
        Self::with_api_key(api_key, config)
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(api_key: String, config: AnthropicConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            config,
            usage: Arc::new(Mutex::new(Usage::default())),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    /// Build the request body for a single-prompt completion
    fn build_request(&self, prompt: &str) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "user", "content": prompt }
            ]
        })
    }

    /// Concatenate text blocks and track usage
    fn parse_response(&self, body: Value) -> Result<String, LlmError> {
        if let Some(u) = body.get("usage") {
            let usage = Usage::new(
                u["input_tokens"].as_u64().unwrap_or(0),
                u["output_tokens"].as_u64().unwrap_or(0),
            );
            if let Ok(mut total) = self.usage.lock() {
                total.add(&usage);
            }
        }

        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| LlmError::InvalidResponse("response has no content array".to_string()))?;

        let text: Vec<&str> = blocks
            .iter()
            .filter(|b| b["type"].as_str() == Some("text"))
            .filter_map(|b| b["text"].as_str())
            .collect();

        if text.is_empty() {
            return Err(LlmError::InvalidResponse("response has no text content".to_string()));
        }
        Ok(text.join("\n"))
    }

    /// Send a request to the Anthropic API
    async fn send_request(&self, body: &Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Get cumulative token usage
    pub fn total_usage(&self) -> Usage {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

/// Delay before retry `attempt` (1-based).
fn backoff(err: &LlmError, attempt: u32) -> Duration {
    match err {
        LlmError::RateLimited { retry_after } => *retry_after,
        _ => Duration::from_secs(2u64.pow(attempt.min(5))),
    }
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = self.build_request(prompt);
        let mut attempt = 0;
        loop {
            match self.send_request(&body).await {
                Ok(response) => return self.parse_response(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff(&e, attempt);
                    log::warn!("reasoning call failed ({}), retry {} in {:?}", e, attempt, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("model", &self.config.model)
            .field("max_tokens", &self.config.max_tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AnthropicClient {
        AnthropicClient::with_api_key("test-key".to_string(), AnthropicConfig::default()).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = AnthropicConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.api_key_env, "ANTHROPIC_API_KEY");
    }

    #[test]
    fn test_config_with_model() {
        let config = AnthropicConfig::with_model("claude-3-haiku-20240307");
        assert_eq!(config.model, "claude-3-haiku-20240307");
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_client_without_api_key() {
        let config = AnthropicConfig {
            api_key_env: "SHELLPILOT_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let result = AnthropicClient::new(config);
        assert!(matches!(result, Err(LlmError::MissingApiKey { .. })));
    }

    #[test]
    fn test_build_request() {
        let body = client().build_request("Install nginx");
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Install nginx");
    }

    #[test]
    fn test_messages_url_trims_slash() {
        let config = AnthropicConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..Default::default()
        };
        let client = AnthropicClient::with_api_key("k".to_string(), config).unwrap();
        assert_eq!(client.messages_url(), "http://localhost:8080/v1/messages");
    }

    #[test]
    fn test_parse_response_joins_text_and_tracks_usage() {
        let client = client();
        let body = json!({
            "content": [
                { "type": "text", "text": "Plan:" },
                { "type": "text", "text": "{\"reasoning\":\"r\"}" }
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        });
        let text = client.parse_response(body).unwrap();
        assert_eq!(text, "Plan:\n{\"reasoning\":\"r\"}");
        assert_eq!(client.total_usage(), Usage::new(10, 5));
    }

    #[test]
    fn test_parse_response_without_text() {
        let result = client().parse_response(json!({ "content": [] }));
        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_backoff() {
        let rate = LlmError::RateLimited {
            retry_after: Duration::from_secs(7),
        };
        assert_eq!(backoff(&rate, 1), Duration::from_secs(7));
        let server = LlmError::ApiError {
            status: 500,
            message: String::new(),
        };
        assert_eq!(backoff(&server, 1), Duration::from_secs(2));
        assert_eq!(backoff(&server, 2), Duration::from_secs(4));
    }
}
