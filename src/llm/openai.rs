//! OpenAI-compatible chat-completions backend.
//!
//! [`OpenAiProvider`] sends the stage's system prompt and user content as a
//! two-message chat request and asks for a JSON object response. Any
//! endpoint speaking the same protocol (Azure OpenAI, OpenRouter, a local
//! gateway) works by overriding the API base.
//!
//! Requests are never retried here. Errors are classified with
//! [`OpenAiApiError::is_retryable`] for callers that want to.

use crate::llm::LlmClient;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

// =============================================================================
// OpenAI API Errors
// =============================================================================

/// Errors specific to chat-completions API interactions.
#[derive(Error, Debug)]
pub enum OpenAiApiError {
    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// Authentication failed - check API key.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Invalid request - check prompt/parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Server error - may be transient.
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Network/connection error.
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// Timeout waiting for response.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The response body did not have the expected shape.
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// API key environment variable not set.
    #[error("API key not found in environment variable {env_var}")]
    ApiKeyNotFound { env_var: String },
}

impl OpenAiApiError {
    /// Check if this error indicates the request could be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::Timeout { .. }
                | Self::ConnectionError { .. }
        )
    }

    /// Classify a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| truncate_body(body));

        match status {
            401 | 403 => Self::AuthenticationFailed { message },
            429 => Self::RateLimited { message },
            400..=499 => Self::InvalidRequest { message },
            _ => Self::ServerError { status, message },
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    if body.chars().count() <= MAX {
        body.trim().to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{}...", cut.trim())
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// =============================================================================
// Provider
// =============================================================================

/// Chat-completions backend client.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    model: String,
    api_key_env: String,
    api_base: String,
    timeout: Duration,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiProvider {
    /// Default API base URL.
    pub const DEFAULT_API_BASE: &'static str = "https://api.openai.com/v1";
    /// Default API key environment variable.
    pub const DEFAULT_API_KEY_ENV: &'static str = "OPENAI_API_KEY";
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

    /// Create a provider for the given model id.
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            model: model.to_string(),
            api_key_env: Self::DEFAULT_API_KEY_ENV.to_string(),
            api_base: Self::DEFAULT_API_BASE.to_string(),
            timeout: Self::DEFAULT_TIMEOUT,
            temperature: Some(0.3),
            max_tokens: None,
        }
    }

    /// Set the environment variable name for the API key.
    #[must_use]
    pub fn with_api_key_env(mut self, env_var: &str) -> Self {
        self.api_key_env = env_var.to_string();
        self
    }

    /// Set a custom API base URL (for Azure OpenAI or proxies).
    #[must_use]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Cap the output tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Full URL of the chat-completions endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn api_key(&self) -> std::result::Result<String, OpenAiApiError> {
        env::var(&self.api_key_env).map_err(|_| OpenAiApiError::ApiKeyNotFound {
            env_var: self.api_key_env.clone(),
        })
    }

    /// Execute one chat-completions request.
    pub async fn execute_request(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> std::result::Result<String, OpenAiApiError> {
        let api_key = self.api_key()?;

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let start = Instant::now();
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OpenAiApiError::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    OpenAiApiError::ConnectionError {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OpenAiApiError::ConnectionError {
                message: e.to_string(),
            })?;

        if !status.is_success() {
            let err = OpenAiApiError::from_status(status.as_u16(), &body);
            warn!("Chat completion failed for {}: {}", self.model, err);
            return Err(err);
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| OpenAiApiError::InvalidResponse {
                message: format!("{} - body: {}", e, truncate_body(&body)),
            })?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "Chat completion from {} in {}ms ({} prompt / {} completion tokens)",
                self.model,
                start.elapsed().as_millis(),
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OpenAiApiError::InvalidResponse {
                message: "response contained no message content".to_string(),
            })
    }
}

#[async_trait]
impl LlmClient for OpenAiProvider {
    async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String> {
        Ok(self.execute_request(system_prompt, user_content).await?)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn available(&self) -> bool {
        self.api_key().is_ok()
    }
}
